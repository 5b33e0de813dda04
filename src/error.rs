//! Error types shared by the library and the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, planning or applying a template.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem error with the path that caused it
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template or lock file could not be decoded
    #[error("parse error in {origin}: {message}")]
    Parse { origin: String, message: String },

    /// Template failed validation; carries the error count
    #[error("{0} validation error(s)")]
    Validation(usize),

    /// Parameter value missing or out of constraints
    #[error("parameter '{name}': {message}")]
    Parameter { name: String, message: String },

    /// Dependency graph contains a cycle
    #[error("dependency cycle detected involving: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// Named resource is not declared
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    /// Stack state could not be read or written
    #[error("state error: {0}")]
    State(String),

    /// Provisioner rejected a change
    #[error("provisioning {resource} failed: {message}")]
    Provision { resource: String, message: String },

    /// Apply failed and the applied changes were rolled back
    #[error("apply failed on '{resource}', rolled back {reverted} change(s): {message}")]
    RolledBack {
        resource: String,
        reverted: usize,
        message: String,
    },

    /// Invalid project configuration
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(origin: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            origin: origin.into(),
            message: message.to_string(),
        }
    }
}

/// Result alias for stackplan operations
pub type Result<T> = std::result::Result<T, Error>;
