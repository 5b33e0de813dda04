//! Project configuration — `stackplan.toml`, `STACKPLAN_*` environment
//! overrides and validation.
//!
//! Precedence: command-line flag > environment > file > default. Flags are
//! applied by the CLI on top of the [`Config`] returned by [`Config::load`].

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "stackplan.toml";

pub const ENV_PREFIX: &str = "STACKPLAN_";

const KNOWN_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!(
                "unknown log format '{}' (expected text or json)",
                other
            ))),
        }
    }
}

/// Resolved project configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Template used when `-f` is not given
    pub template: PathBuf,
    pub state_dir: PathBuf,
    /// Stack name used when `--stack` is not given
    pub stack: String,
    /// Treat validation warnings as errors
    pub strict: bool,
    /// Roll back on apply failure
    pub rollback: bool,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Default parameter values, below `-p` overrides
    pub parameters: IndexMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template: PathBuf::from("template.yaml"),
            state_dir: PathBuf::from("state"),
            stack: "default".to_string(),
            strict: false,
            rollback: true,
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            parameters: IndexMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, or from `stackplan.toml` in the working directory if
    /// present, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        apply_env_overrides(&mut config, &StdEnv)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&text).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.message().to_string()))
    }

    /// Check the configuration for values the CLI cannot use.
    pub fn validate(&self) -> Result<()> {
        validate_stack_name(&self.stack)?;
        if self.state_dir.as_os_str().is_empty() {
            return Err(Error::Config("state_dir must not be empty".to_string()));
        }
        if !KNOWN_LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            tracing::warn!(
                log_level = %self.log_level,
                "unrecognised log_level; passing it to the log filter as-is"
            );
        }
        Ok(())
    }
}

/// Check that a stack name can be used as a file name inside the state
/// directory.
pub fn validate_stack_name(stack: &str) -> Result<()> {
    if stack.trim().is_empty() {
        return Err(Error::Config("stack name must not be empty".to_string()));
    }
    if stack.contains(['/', '\\']) || stack == "." || stack == ".." {
        return Err(Error::Config(format!("stack name '{}' must not be a path", stack)));
    }
    Ok(())
}

/// Abstraction over environment lookups so tests can supply overrides.
pub trait EnvSource {
    /// Get a variable by its name without the `STACKPLAN_` prefix.
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment.
pub struct StdEnv;

impl EnvSource for StdEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

/// Apply `STACKPLAN_*` overrides on top of file values.
pub fn apply_env_overrides<E: EnvSource>(config: &mut Config, env: &E) -> Result<()> {
    if let Some(template) = env.get("TEMPLATE") {
        config.template = PathBuf::from(template);
    }
    if let Some(dir) = env.get("STATE_DIR") {
        config.state_dir = PathBuf::from(dir);
    }
    if let Some(stack) = env.get("STACK") {
        config.stack = stack;
    }
    if let Some(strict) = get_env_bool(env, "STRICT")? {
        config.strict = strict;
    }
    if let Some(rollback) = get_env_bool(env, "ROLLBACK")? {
        config.rollback = rollback;
    }
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log_format = format.parse()?;
    }
    Ok(())
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match env.get(key) {
        Some(val) => match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Config(format!(
                "failed to parse {}{} (expected bool): '{}'",
                ENV_PREFIX, key, val
            ))),
        },
        None => Ok(None),
    }
}
