//! stackplan — plan and apply declarative infrastructure templates.
//!
//! Parses CloudFormation-style templates, validates references and literals,
//! orders resources by dependency and diffs desired state against a BLAKE3
//! stack lock. Applies run through a [`provisioner::Provisioner`] and roll back
//! on failure.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod provisioner;
pub mod tripwire;

pub use error::{Error, Result};
