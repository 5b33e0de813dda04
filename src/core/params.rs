//! Parameter resolution — overrides, defaults and constraint checks.

use super::types::{value_to_string, Parameter, Template};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;

/// Mask shown in place of `NoEcho` values.
pub const MASK: &str = "****";

/// Parameter values after applying overrides and defaults.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParameters {
    values: IndexMap<String, String>,
    no_echo: HashSet<String>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value as it may be printed (`NoEcho` values masked).
    pub fn display_value(&self, name: &str) -> Option<&str> {
        if self.no_echo.contains(name) {
            return self.values.get(name).map(|_| MASK);
        }
        self.get(name)
    }

    /// All resolved values, in declaration order.
    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse `KEY=VALUE` pairs from the command line.
pub fn parse_overrides(pairs: &[String]) -> Result<IndexMap<String, String>> {
    let mut out = IndexMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| Error::Parameter {
            name: pair.clone(),
            message: "expected KEY=VALUE".to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Parameter {
                name: pair.clone(),
                message: "empty parameter name".to_string(),
            });
        }
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Resolve every declared parameter: override, else default, else error.
pub fn resolve_parameters(
    template: &Template,
    overrides: &IndexMap<String, String>,
) -> Result<ResolvedParameters> {
    if let Some(unknown) = overrides
        .keys()
        .find(|k| !template.parameters.contains_key(*k))
    {
        return Err(Error::Parameter {
            name: unknown.clone(),
            message: "not declared in template".to_string(),
        });
    }

    let mut resolved = ResolvedParameters::default();
    for (name, param) in &template.parameters {
        let value = match overrides.get(name) {
            Some(v) => v.clone(),
            None => match &param.default {
                Some(d) => value_to_string(d),
                None => {
                    return Err(Error::Parameter {
                        name: name.clone(),
                        message: "missing value (no override and no default)".to_string(),
                    })
                }
            },
        };
        check_value(param, &value).map_err(|message| Error::Parameter {
            name: name.clone(),
            message,
        })?;
        if param.is_no_echo() {
            resolved.no_echo.insert(name.clone());
        }
        tracing::debug!(
            parameter = %name,
            overridden = overrides.contains_key(name),
            "resolved parameter"
        );
        resolved.values.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Check a value against a parameter's constraints.
///
/// Returns the constraint description (when declared) or a specific message.
pub fn check_value(param: &Parameter, value: &str) -> std::result::Result<(), String> {
    let fail = |msg: String| -> std::result::Result<(), String> {
        Err(param.constraint_description.clone().unwrap_or(msg))
    };

    if !param.allowed_values.is_empty()
        && !param
            .allowed_values
            .iter()
            .any(|av| value_to_string(av) == value)
    {
        let allowed: Vec<String> = param.allowed_values.iter().map(value_to_string).collect();
        return fail(format!(
            "'{}' is not one of the allowed values [{}]",
            value,
            allowed.join(", ")
        ));
    }

    if let Some(pattern) = &param.allowed_pattern {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| format!("invalid AllowedPattern '{}': {}", pattern, e))?;
        if !re.is_match(value) {
            return fail(format!("'{}' does not match pattern '{}'", value, pattern));
        }
    }

    match param.param_type.as_str() {
        "Number" => {
            let Ok(n) = value.trim().parse::<f64>() else {
                return fail(format!("'{}' is not a number", value));
            };
            if let Some(min) = param.min_value {
                if n < min {
                    return fail(format!("{} is less than MinValue {}", n, min));
                }
            }
            if let Some(max) = param.max_value {
                if n > max {
                    return fail(format!("{} is greater than MaxValue {}", n, max));
                }
            }
        }
        "List<Number>" => {
            for item in value.split(',') {
                if item.trim().parse::<f64>().is_err() {
                    return fail(format!("'{}' is not a number", item.trim()));
                }
            }
        }
        _ => {
            let len = value.chars().count() as u64;
            if let Some(min) = param.min_length {
                if len < min {
                    return fail(format!("length {} is less than MinLength {}", len, min));
                }
            }
            if let Some(max) = param.max_length {
                if len > max {
                    return fail(format!("length {} is greater than MaxLength {}", len, max));
                }
            }
        }
    }

    Ok(())
}
