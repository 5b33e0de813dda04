//! Intrinsic functions — short-form tag normalisation and reference extraction.
//!
//! `!Ref X` becomes `{Ref: X}`, `!GetAtt A.B` becomes `{Fn::GetAtt: [A, B]}` and
//! any other `!Name v` becomes `{Fn::Name: v}`. After normalisation every
//! reference is a single-key mapping and can be found by walking the value tree.

use super::types::value_to_string;
use indexmap::IndexMap;
use serde_yaml_ng::{Mapping, Value};

/// Pseudo parameters that `Ref` may name without a declaration.
pub const PSEUDO_PARAMETERS: &[&str] = &[
    "AWS::AccountId",
    "AWS::NotificationARNs",
    "AWS::NoValue",
    "AWS::Partition",
    "AWS::Region",
    "AWS::StackId",
    "AWS::StackName",
    "AWS::URLSuffix",
];

/// How a reference was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// `Ref` — resource, parameter or pseudo parameter
    Ref,
    /// `Fn::GetAtt` — resource attribute
    GetAtt,
    /// `${Name}` inside `Fn::Sub`
    SubVar,
    /// `${Name.Attr}` inside `Fn::Sub`
    SubAttr,
    /// Condition name used by `Fn::If` or `Condition`
    Condition,
}

impl RefKind {
    /// Whether the target must be a resource.
    pub fn requires_resource(self) -> bool {
        matches!(self, Self::GetAtt | Self::SubAttr)
    }
}

/// A reference found in a value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub attribute: Option<String>,
    pub kind: RefKind,
    /// Dotted location, e.g. `Resources.Web.Properties.SubnetId`
    pub path: String,
}

/// Rewrite short-form tags into long-form intrinsic mappings.
pub fn normalize_tags(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, normalize_tags(v)))
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(normalize_tags).collect()),
        Value::Tagged(tagged) => {
            let tagged = *tagged;
            let tag = tagged.tag.to_string();
            let name = tag.trim_start_matches('!');
            let inner = normalize_tags(tagged.value);
            match name {
                "Ref" => single_key("Ref", inner),
                "Condition" => single_key("Condition", inner),
                "GetAtt" => {
                    let inner = match inner {
                        Value::String(s) => match s.split_once('.') {
                            Some((res, attr)) => Value::Sequence(vec![
                                Value::String(res.to_string()),
                                Value::String(attr.to_string()),
                            ]),
                            None => Value::String(s),
                        },
                        other => other,
                    };
                    single_key("Fn::GetAtt", inner)
                }
                other => single_key(&format!("Fn::{}", other), inner),
            }
        }
        other => other,
    }
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Mapping::new();
    map.insert(Value::String(key.to_string()), value);
    Value::Mapping(map)
}

/// If `value` is a single-key mapping, return that key and its value.
pub(crate) fn as_intrinsic(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_mapping()?;
    if map.len() != 1 {
        return None;
    }
    let (k, v) = map.iter().next()?;
    Some((k.as_str()?, v))
}

/// Collect every reference inside `value`.
///
/// `condition_keys` treats `{Condition: name}` as a condition reference; only
/// meaningful inside the `Conditions` section, where IAM-style `Condition`
/// blocks cannot appear.
pub fn collect_references(value: &Value, path: &str, condition_keys: bool, out: &mut Vec<Reference>) {
    if let Some((key, arg)) = as_intrinsic(value) {
        match key {
            "Ref" => {
                if let Some(target) = arg.as_str() {
                    out.push(Reference {
                        target: target.to_string(),
                        attribute: None,
                        kind: RefKind::Ref,
                        path: path.to_string(),
                    });
                    return;
                }
            }
            "Fn::GetAtt" => {
                if let Some((target, attribute)) = getatt_parts(arg) {
                    out.push(Reference {
                        target,
                        attribute,
                        kind: RefKind::GetAtt,
                        path: path.to_string(),
                    });
                }
                // Attribute may itself be a Ref in the list form
                if let Value::Sequence(items) = arg {
                    for item in items.iter().skip(1) {
                        collect_references(item, path, condition_keys, out);
                    }
                }
                return;
            }
            "Fn::Sub" => {
                collect_sub(arg, path, condition_keys, out);
                return;
            }
            "Fn::If" => {
                if let Value::Sequence(items) = arg {
                    if let Some(Value::String(cond)) = items.first() {
                        out.push(Reference {
                            target: cond.clone(),
                            attribute: None,
                            kind: RefKind::Condition,
                            path: path.to_string(),
                        });
                    }
                    for item in items.iter().skip(1) {
                        collect_references(item, path, condition_keys, out);
                    }
                    return;
                }
            }
            "Condition" if condition_keys => {
                if let Some(cond) = arg.as_str() {
                    out.push(Reference {
                        target: cond.to_string(),
                        attribute: None,
                        kind: RefKind::Condition,
                        path: path.to_string(),
                    });
                    return;
                }
            }
            _ => {}
        }
    }

    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let key = k.as_str().map(str::to_string).unwrap_or_else(|| value_to_string(k));
                collect_references(v, &format!("{}.{}", path, key), condition_keys, out);
            }
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                collect_references(v, &format!("{}[{}]", path, i), condition_keys, out);
            }
        }
        _ => {}
    }
}

/// Collect references from a property map.
pub fn property_references(properties: &IndexMap<String, Value>, path: &str) -> Vec<Reference> {
    let mut out = Vec::new();
    for (key, value) in properties {
        collect_references(value, &format!("{}.{}", path, key), false, &mut out);
    }
    out
}

fn getatt_parts(arg: &Value) -> Option<(String, Option<String>)> {
    match arg {
        Value::String(s) => Some(match s.split_once('.') {
            Some((res, attr)) => (res.to_string(), Some(attr.to_string())),
            None => (s.clone(), None),
        }),
        Value::Sequence(items) => {
            let target = items.first()?.as_str()?.to_string();
            let attribute = items.get(1).and_then(Value::as_str).map(str::to_string);
            Some((target, attribute))
        }
        _ => None,
    }
}

fn collect_sub(arg: &Value, path: &str, condition_keys: bool, out: &mut Vec<Reference>) {
    let (text, locals) = match arg {
        Value::String(s) => (s.as_str(), None),
        Value::Sequence(items) => {
            let Some(text) = items.first().and_then(Value::as_str) else {
                return;
            };
            let locals = items.get(1).and_then(Value::as_mapping);
            if let Some(vars) = locals {
                for (k, v) in vars {
                    let key = k.as_str().unwrap_or_default();
                    collect_references(v, &format!("{}.{}", path, key), condition_keys, out);
                }
            }
            (text, locals)
        }
        _ => return,
    };

    for var in sub_variables(text) {
        if let Some(vars) = locals {
            if vars.contains_key(var.as_str()) {
                continue;
            }
        }
        let reference = match var.split_once('.') {
            Some((target, attr)) if !var.contains("::") => Reference {
                target: target.to_string(),
                attribute: Some(attr.to_string()),
                kind: RefKind::SubAttr,
                path: path.to_string(),
            },
            _ => Reference {
                target: var,
                attribute: None,
                kind: RefKind::SubVar,
                path: path.to_string(),
            },
        };
        out.push(reference);
    }
}

/// Variable names referenced by a `Fn::Sub` string. `${!Literal}` is skipped.
pub fn sub_variables(text: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        let name = after[..close].trim();
        if !name.is_empty() && !name.starts_with('!') {
            vars.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    vars
}

/// Replace parameter references with their resolved values.
///
/// Used for desired-state hashing so a changed parameter shows up as a changed
/// property on every resource that reads it.
pub fn substitute_parameters(value: &Value, params: &IndexMap<String, String>) -> Value {
    if let Some((key, arg)) = as_intrinsic(value) {
        match key {
            "Ref" => {
                if let Some(resolved) = arg.as_str().and_then(|name| params.get(name)) {
                    return Value::String(resolved.clone());
                }
            }
            "Fn::Sub" => match arg {
                Value::String(text) => {
                    return single_key("Fn::Sub", Value::String(substitute_sub(text, params, None)));
                }
                Value::Sequence(items) => {
                    if let Some(text) = items.first().and_then(Value::as_str) {
                        let locals = items.get(1).and_then(Value::as_mapping);
                        let mut substituted = vec![Value::String(substitute_sub(text, params, locals))];
                        substituted.extend(items.iter().skip(1).map(|v| substitute_parameters(v, params)));
                        return single_key("Fn::Sub", Value::Sequence(substituted));
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_parameters(v, params)))
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|v| substitute_parameters(v, params))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute `${Param}` in a `Fn::Sub` string. Names bound in `locals` shadow
/// parameters and are left in place.
fn substitute_sub(
    text: &str,
    params: &IndexMap<String, String>,
    locals: Option<&Mapping>,
) -> String {
    let mut result = text.to_string();
    for (name, value) in params {
        if locals.is_some_and(|vars| vars.contains_key(name.as_str())) {
            continue;
        }
        result = result.replace(&format!("${{{}}}", name), value);
    }
    result
}
