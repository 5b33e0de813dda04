//! Template parsing and structural validation.
//!
//! Parses YAML or JSON templates (short-form tags normalised on the way in)
//! and validates them without stopping at the first problem:
//! - Format version, names and resource type syntax
//! - Every `Ref`, `GetAtt`, `Sub` and `DependsOn` target exists
//! - Conditions used are declared
//! - Parameter types and defaults
//! - Literal CIDR blocks and port ranges
//! - The dependency graph is acyclic

use super::intrinsics::{self, RefKind, PSEUDO_PARAMETERS};
use super::params;
use super::resolver;
use super::types::*;
use crate::error::{Error, Result};
use regex::Regex;
use serde_yaml_ng::Value;
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::LazyLock;

/// The only accepted format version.
pub const FORMAT_VERSION: &str = "2010-09-09";

static LOGICAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("static regex"));

static RESOURCE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9]+::[A-Za-z0-9]+::[A-Za-z0-9:]+|Custom::[A-Za-z0-9_@-]+)$")
        .expect("static regex")
});

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Location, e.g. `Resources.Web.Properties.SubnetId`
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Count the diagnostics that fail validation.
pub fn error_count(diagnostics: &[Diagnostic], strict: bool) -> usize {
    diagnostics
        .iter()
        .filter(|d| strict || d.severity == Severity::Error)
        .count()
}

/// Parse a template file from disk.
pub fn parse_template_file(path: &Path) -> Result<Template> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_template_from(&content, &path.display().to_string())
}

/// Parse a template from a string.
pub fn parse_template(text: &str) -> Result<Template> {
    parse_template_from(text, "template")
}

fn parse_template_from(text: &str, origin: &str) -> Result<Template> {
    let raw: Value = if text.trim_start().starts_with('{') {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::parse(origin, e))?;
        serde_yaml_ng::to_value(json).map_err(|e| Error::parse(origin, e))?
    } else {
        serde_yaml_ng::from_str(text).map_err(|e| Error::parse(origin, e))?
    };
    if !raw.is_mapping() {
        return Err(Error::parse(origin, "template must be a mapping"));
    }
    let template: Template = serde_yaml_ng::from_value(intrinsics::normalize_tags(raw))
        .map_err(|e| Error::parse(origin, e))?;
    tracing::debug!(
        origin,
        resources = template.resources.len(),
        parameters = template.parameters.len(),
        "parsed template"
    );
    Ok(template)
}

struct Collector {
    diagnostics: Vec<Diagnostic>,
}

impl Collector {
    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a parsed template. Returns all diagnostics (empty = valid).
pub fn validate_template(template: &Template) -> Vec<Diagnostic> {
    let mut c = Collector {
        diagnostics: Vec::new(),
    };

    if let Some(version) = &template.format_version {
        if version != FORMAT_VERSION {
            c.error(
                "AWSTemplateFormatVersion",
                format!("must be \"{}\", got \"{}\"", FORMAT_VERSION, version),
            );
        }
    }

    if template.resources.is_empty() {
        c.error("Resources", "template must declare at least one resource");
    }

    validate_parameters(template, &mut c);
    validate_resources(template, &mut c);
    validate_conditions(template, &mut c);
    validate_outputs(template, &mut c);

    let graph = resolver::build_graph(template);
    if let Err(Error::Cycle(members)) = graph.execution_order() {
        c.error(
            "Resources",
            format!("dependency cycle detected involving: {}", members.join(", ")),
        );
    }

    c.diagnostics
}

fn validate_parameters(template: &Template, c: &mut Collector) {
    for (name, param) in &template.parameters {
        let path = format!("Parameters.{}", name);
        if !LOGICAL_NAME.is_match(name) {
            c.error(&path, "name must be alphanumeric");
        }
        if template.resources.contains_key(name) {
            c.error(&path, format!("'{}' is declared as both parameter and resource", name));
        }
        if !is_known_parameter_type(&param.param_type) {
            c.error(
                format!("{}.Type", path),
                format!("unknown parameter type '{}'", param.param_type),
            );
            continue;
        }
        if let Some(default) = &param.default {
            if let Err(msg) = params::check_value(param, &value_to_string(default)) {
                c.error(format!("{}.Default", path), msg);
            }
        }
        if let (Some(min), Some(max)) = (param.min_length, param.max_length) {
            if min > max {
                c.error(&path, format!("MinLength {} exceeds MaxLength {}", min, max));
            }
        }
        if let (Some(min), Some(max)) = (param.min_value, param.max_value) {
            if min > max {
                c.error(&path, format!("MinValue {} exceeds MaxValue {}", min, max));
            }
        }
    }
}

/// Whether a parameter type is one the engine accepts.
pub fn is_known_parameter_type(t: &str) -> bool {
    match t {
        "String" | "Number" | "List<Number>" | "CommaDelimitedList" => true,
        _ => {
            (t.starts_with("AWS::") && t.matches("::").count() >= 2)
                || (t.starts_with("List<AWS::") && t.ends_with('>'))
                || (t.starts_with("AWS::SSM::Parameter::Value<") && t.ends_with('>'))
        }
    }
}

fn validate_resources(template: &Template, c: &mut Collector) {
    for (id, resource) in &template.resources {
        let path = format!("Resources.{}", id);

        if !LOGICAL_NAME.is_match(id) {
            c.error(&path, "name must be alphanumeric");
        }
        if !RESOURCE_TYPE.is_match(&resource.resource_type) {
            c.error(
                format!("{}.Type", path),
                format!("malformed resource type '{}'", resource.resource_type),
            );
        }

        for dep in resource.depends_on.to_vec() {
            if dep == *id {
                c.error(format!("{}.DependsOn", path), format!("resource '{}' depends on itself", id));
            } else if !template.resources.contains_key(&dep) {
                c.error(
                    format!("{}.DependsOn", path),
                    format!("resource '{}' depends on unknown resource '{}'", id, dep),
                );
            }
        }

        if let Some(cond) = &resource.condition {
            if !template.conditions.contains_key(cond) {
                c.error(format!("{}.Condition", path), format!("unknown condition '{}'", cond));
            }
        }

        let props_path = format!("{}.Properties", path);
        for reference in intrinsics::property_references(&resource.properties, &props_path) {
            if reference.target == *id && reference.kind != RefKind::Condition {
                c.error(&reference.path, format!("resource '{}' refers to itself", id));
                continue;
            }
            check_reference(template, &reference, c);
        }

        for (key, value) in &resource.properties {
            check_literals(key, value, &format!("{}.{}", props_path, key), c);
        }
        check_port_pairs(&Value::Mapping(
            resource
                .properties
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                .collect(),
        ), &props_path, c);
    }
}

fn check_reference(template: &Template, reference: &intrinsics::Reference, c: &mut Collector) {
    let target = reference.target.as_str();
    match reference.kind {
        RefKind::Condition => {
            if !template.conditions.contains_key(target) {
                c.error(&reference.path, format!("unknown condition '{}'", target));
            }
        }
        kind if kind.requires_resource() => {
            if !template.resources.contains_key(target) {
                c.error(
                    &reference.path,
                    format!(
                        "attribute {}.{} refers to unknown resource '{}'",
                        target,
                        reference.attribute.as_deref().unwrap_or("?"),
                        target
                    ),
                );
            }
        }
        _ => {
            let known = template.resources.contains_key(target)
                || template.parameters.contains_key(target)
                || PSEUDO_PARAMETERS.contains(&target);
            if !known {
                c.error(
                    &reference.path,
                    format!("reference to unknown resource or parameter '{}'", target),
                );
            }
        }
    }
}

fn validate_conditions(template: &Template, c: &mut Collector) {
    for (name, expr) in &template.conditions {
        let path = format!("Conditions.{}", name);
        let mut refs = Vec::new();
        intrinsics::collect_references(expr, &path, true, &mut refs);
        for reference in refs {
            if reference.kind == RefKind::Condition && reference.target == *name {
                c.error(&reference.path, format!("condition '{}' refers to itself", name));
                continue;
            }
            check_reference(template, &reference, c);
        }
    }
}

fn validate_outputs(template: &Template, c: &mut Collector) {
    let mut exports: HashSet<String> = HashSet::new();
    for (name, output) in &template.outputs {
        let path = format!("Outputs.{}", name);
        if !LOGICAL_NAME.is_match(name) {
            c.error(&path, "name must be alphanumeric");
        }
        let mut refs = Vec::new();
        intrinsics::collect_references(&output.value, &format!("{}.Value", path), false, &mut refs);
        if let Some(export) = &output.export {
            intrinsics::collect_references(&export.name, &format!("{}.Export.Name", path), false, &mut refs);
            if let Value::String(export_name) = &export.name {
                if !exports.insert(export_name.clone()) {
                    c.error(
                        format!("{}.Export.Name", path),
                        format!("duplicate export name '{}'", export_name),
                    );
                }
            }
        }
        for reference in refs {
            check_reference(template, &reference, c);
        }
        if let Some(cond) = &output.condition {
            if !template.conditions.contains_key(cond) {
                c.error(format!("{}.Condition", path), format!("unknown condition '{}'", cond));
            }
        }
    }
}

// ============================================================================
// Literal checks
// ============================================================================

/// Result of checking a CIDR literal.
#[derive(Debug, PartialEq, Eq)]
pub enum CidrCheck {
    Valid,
    /// Address has bits set beyond the prefix
    HostBitsSet,
    Invalid(String),
}

/// Check an IPv4 CIDR block such as `10.0.0.0/16`.
pub fn check_ipv4_cidr(s: &str) -> CidrCheck {
    let Some((addr, prefix)) = s.split_once('/') else {
        return CidrCheck::Invalid(format!("'{}' is missing a /prefix", s));
    };
    let Ok(addr) = addr.parse::<Ipv4Addr>() else {
        return CidrCheck::Invalid(format!("'{}' is not an IPv4 address", addr));
    };
    let prefix = match prefix.parse::<u32>() {
        Ok(p) if p <= 32 => p,
        _ => return CidrCheck::Invalid(format!("prefix '/{}' must be 0-32", prefix)),
    };
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    if u32::from(addr) & !mask != 0 {
        return CidrCheck::HostBitsSet;
    }
    CidrCheck::Valid
}

/// Check an IPv6 CIDR block such as `2001:db8::/32`.
pub fn check_ipv6_cidr(s: &str) -> CidrCheck {
    let Some((addr, prefix)) = s.split_once('/') else {
        return CidrCheck::Invalid(format!("'{}' is missing a /prefix", s));
    };
    let Ok(addr) = addr.parse::<Ipv6Addr>() else {
        return CidrCheck::Invalid(format!("'{}' is not an IPv6 address", addr));
    };
    let prefix = match prefix.parse::<u32>() {
        Ok(p) if p <= 128 => p,
        _ => return CidrCheck::Invalid(format!("prefix '/{}' must be 0-128", prefix)),
    };
    let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
    if u128::from(addr) & !mask != 0 {
        return CidrCheck::HostBitsSet;
    }
    CidrCheck::Valid
}

fn cidr_family(key: &str) -> Option<bool> {
    // Some(true) = IPv6, Some(false) = IPv4
    if key == "CidrIpv6" || key.ends_with("Ipv6CidrBlock") {
        Some(true)
    } else if key == "CidrIp" || key.ends_with("CidrBlock") {
        Some(false)
    } else {
        None
    }
}

/// Walk a property value checking CIDR literals.
fn check_literals(key: &str, value: &Value, path: &str, c: &mut Collector) {
    match value {
        Value::String(s) => {
            let check = match cidr_family(key) {
                Some(true) => check_ipv6_cidr(s),
                Some(false) => check_ipv4_cidr(s),
                None => return,
            };
            match check {
                CidrCheck::Valid => {}
                CidrCheck::HostBitsSet => {
                    c.warning(path, format!("CIDR '{}' has host bits set", s))
                }
                CidrCheck::Invalid(msg) => c.error(path, format!("invalid CIDR block: {}", msg)),
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(k) = k.as_str() {
                    check_literals(k, v, &format!("{}.{}", path, k), c);
                }
            }
            check_port_pairs(value, path, c);
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                check_literals(key, v, &format!("{}[{}]", path, i), c);
            }
        }
        _ => {}
    }
}

fn literal_port(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Check `FromPort`/`ToPort`/`Port` literals within one mapping.
fn check_port_pairs(value: &Value, path: &str, c: &mut Collector) {
    let Some(map) = value.as_mapping() else {
        return;
    };
    let mut ports = [None, None];
    for key in ["FromPort", "ToPort", "Port"] {
        let Some(raw) = map.get(key) else {
            continue;
        };
        let Some(port) = literal_port(raw) else {
            continue;
        };
        if !(-1..=65535).contains(&port) {
            c.error(
                format!("{}.{}", path, key),
                format!("port {} out of range (-1..65535)", port),
            );
        }
        match key {
            "FromPort" => ports[0] = Some(port),
            "ToPort" => ports[1] = Some(port),
            _ => {}
        }
    }
    if let [Some(from), Some(to)] = ports {
        if from > to && from != -1 {
            c.error(path, format!("FromPort {} is greater than ToPort {}", from, to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostics(yaml: &str) -> Vec<Diagnostic> {
        validate_template(&parse_template(yaml).unwrap())
    }

    fn has_error(diags: &[Diagnostic], needle: &str) -> bool {
        diags
            .iter()
            .any(|d| d.severity == Severity::Error && d.message.contains(needle))
    }

    #[test]
    fn test_parse_valid() {
        let yaml = r#"
AWSTemplateFormatVersion: "2010-09-09"
Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: 10.0.0.0/16
  Subnet:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: 10.0.1.0/24
"#;
        let diags = diagnostics(yaml);
        assert!(diags.is_empty(), "unexpected: {:?}", diags);
    }

    #[test]
    fn test_parse_json_template() {
        let json = r#"{
	"AWSTemplateFormatVersion": "2010-09-09",
	"Resources": {
		"VPC": {"Type": "AWS::EC2::VPC", "Properties": {"CidrBlock": "10.0.0.0/16"}},
		"Subnet": {"Type": "AWS::EC2::Subnet", "Properties": {"VpcId": {"Ref": "VPC"}}}
	}
}"#;
        let t = parse_template(json).unwrap();
        assert_eq!(t.resources.len(), 2);
        assert!(validate_template(&t).is_empty());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(matches!(
            parse_template("not: [valid: yaml: {{"),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_non_mapping() {
        assert!(parse_template("- a\n- b").is_err());
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "Resources:\n  Q:\n    Type: AWS::SQS::Queue\n").unwrap();
        let t = parse_template_file(&path).unwrap();
        assert!(t.resources.contains_key("Q"));
    }

    #[test]
    fn test_parse_file_missing() {
        let err = parse_template_file(Path::new("/nonexistent/stack.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_bad_version() {
        let diags = diagnostics(
            "AWSTemplateFormatVersion: \"2011-01-01\"\nResources:\n  Q:\n    Type: AWS::SQS::Queue\n",
        );
        assert!(has_error(&diags, "must be \"2010-09-09\""));
    }

    #[test]
    fn test_empty_resources() {
        let diags = diagnostics("Description: nothing\nResources: {}\n");
        assert!(has_error(&diags, "at least one resource"));
    }

    #[test]
    fn test_malformed_type_and_name() {
        let diags = diagnostics("Resources:\n  my-vpc:\n    Type: VPC\n");
        assert!(has_error(&diags, "alphanumeric"));
        assert!(has_error(&diags, "malformed resource type 'VPC'"));
    }

    #[test]
    fn test_custom_type_accepted() {
        let diags = diagnostics("Resources:\n  Seed:\n    Type: Custom::DatabaseSeed\n");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_unknown_ref() {
        let yaml = r#"
Resources:
  Subnet:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref Ghost
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "unknown resource or parameter 'Ghost'"));
        assert_eq!(diags[0].path, "Resources.Subnet.Properties.VpcId");
    }

    #[test]
    fn test_ref_parameter_and_pseudo_ok() {
        let yaml = r#"
Parameters:
  Cidr:
    Type: String
    Default: 10.0.0.0/16
Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: !Ref Cidr
      Tags:
        - Key: Name
          Value: !Sub "${AWS::StackName}-vpc"
        - Key: Region
          Value: !Ref AWS::Region
"#;
        assert!(diagnostics(yaml).is_empty());
    }

    #[test]
    fn test_getatt_on_parameter_is_error() {
        let yaml = r#"
Parameters:
  Env:
    Type: String
    Default: dev
Resources:
  Q:
    Type: AWS::SQS::Queue
    Properties:
      QueueName: !GetAtt Env.Value
"#;
        assert!(has_error(&diagnostics(yaml), "refers to unknown resource 'Env'"));
    }

    #[test]
    fn test_depends_on_unknown_and_self() {
        let yaml = r#"
Resources:
  A:
    Type: AWS::SQS::Queue
    DependsOn: [Ghost, A]
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "depends on unknown resource 'Ghost'"));
        assert!(has_error(&diags, "depends on itself"));
    }

    #[test]
    fn test_self_reference_in_properties() {
        let yaml = r#"
Resources:
  A:
    Type: AWS::SQS::Queue
    Properties:
      RedrivePolicy:
        deadLetterTargetArn: !GetAtt A.Arn
"#;
        assert!(has_error(&diagnostics(yaml), "refers to itself"));
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = r#"
Resources:
  A:
    Type: AWS::SQS::Queue
    Properties:
      Name: !Ref B
  B:
    Type: AWS::SQS::Queue
    DependsOn: A
"#;
        assert!(has_error(&diagnostics(yaml), "dependency cycle detected involving: A, B"));
    }

    #[test]
    fn test_unknown_condition() {
        let yaml = r#"
Conditions:
  IsProd: !Equals [!Ref AWS::StackName, prod]
Resources:
  A:
    Type: AWS::SQS::Queue
    Condition: IsStaging
    Properties:
      DelaySeconds: !If [IsProd, 0, 5]
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "unknown condition 'IsStaging'"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_condition_refs_condition() {
        let yaml = r#"
Conditions:
  IsProd: !Equals [!Ref AWS::StackName, prod]
  IsNotProd: !Not [!Condition IsProd]
  Broken: !Not [!Condition Missing]
Resources:
  A:
    Type: AWS::SQS::Queue
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "unknown condition 'Missing'"));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_unknown_parameter_type() {
        let yaml = r#"
Parameters:
  Size:
    Type: Integer
Resources:
  A:
    Type: AWS::SQS::Queue
"#;
        assert!(has_error(&diagnostics(yaml), "unknown parameter type 'Integer'"));
    }

    #[test]
    fn test_known_parameter_types() {
        assert!(is_known_parameter_type("String"));
        assert!(is_known_parameter_type("AWS::EC2::KeyPair::KeyName"));
        assert!(is_known_parameter_type("List<AWS::EC2::Subnet::Id>"));
        assert!(is_known_parameter_type(
            "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>"
        ));
        assert!(!is_known_parameter_type("AWS::Thing"));
        assert!(!is_known_parameter_type("Bool"));
    }

    #[test]
    fn test_default_outside_allowed_values() {
        let yaml = r#"
Parameters:
  InstanceType:
    Type: String
    Default: m5.24xlarge
    AllowedValues: [t3.micro, t3.small]
Resources:
  A:
    Type: AWS::SQS::Queue
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "not one of the allowed values"));
        assert_eq!(diags[0].path, "Parameters.InstanceType.Default");
    }

    #[test]
    fn test_name_collision() {
        let yaml = r#"
Parameters:
  VPC:
    Type: String
    Default: x
Resources:
  VPC:
    Type: AWS::EC2::VPC
"#;
        assert!(has_error(&diagnostics(yaml), "both parameter and resource"));
    }

    #[test]
    fn test_invalid_cidr() {
        let yaml = r#"
Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: 10.0.0.300/16
  Route:
    Type: AWS::EC2::Route
    Properties:
      DestinationCidrBlock: 0.0.0.0/33
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "not an IPv4 address"));
        assert!(has_error(&diags, "must be 0-32"));
    }

    #[test]
    fn test_cidr_in_nested_ingress() {
        let yaml = r#"
Resources:
  SG:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: web
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 80
          ToPort: 80
          CidrIp: 0.0.0.0
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "missing a /prefix"));
        assert_eq!(
            diags[0].path,
            "Resources.SG.Properties.SecurityGroupIngress[0].CidrIp"
        );
    }

    #[test]
    fn test_ipv6_cidr_properties() {
        let yaml = r#"
Resources:
  Subnet:
    Type: AWS::EC2::Subnet
    Properties:
      CidrBlock: 10.0.1.0/24
      Ipv6CidrBlock: 10.0.2.0/24
  SG:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: web
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 443
          ToPort: 443
          CidrIpv6: "2001:db8::/129"
        - IpProtocol: tcp
          FromPort: 80
          ToPort: 80
          CidrIpv6: "::/0"
"#;
        let diags = diagnostics(yaml);
        assert_eq!(diags.len(), 2);
        assert!(has_error(&diags, "not an IPv6 address"));
        assert!(has_error(&diags, "must be 0-128"));
        let paths: Vec<&str> = diags.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"Resources.Subnet.Properties.Ipv6CidrBlock"));
        assert!(paths.contains(&"Resources.SG.Properties.SecurityGroupIngress[0].CidrIpv6"));
    }

    #[test]
    fn test_cidr_host_bits_warning() {
        let yaml = r#"
Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: 10.0.0.1/16
"#;
        let diags = diagnostics(yaml);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(error_count(&diags, false), 0);
        assert_eq!(error_count(&diags, true), 1);
    }

    #[test]
    fn test_check_cidr_functions() {
        assert_eq!(check_ipv4_cidr("10.0.0.0/16"), CidrCheck::Valid);
        assert_eq!(check_ipv4_cidr("0.0.0.0/0"), CidrCheck::Valid);
        assert_eq!(check_ipv4_cidr("10.0.0.1/32"), CidrCheck::Valid);
        assert_eq!(check_ipv4_cidr("10.0.1.0/16"), CidrCheck::HostBitsSet);
        assert!(matches!(check_ipv4_cidr("10.0.0.0"), CidrCheck::Invalid(_)));
        assert_eq!(check_ipv6_cidr("2001:db8::/32"), CidrCheck::Valid);
        assert_eq!(check_ipv6_cidr("::/0"), CidrCheck::Valid);
        assert!(matches!(check_ipv6_cidr("2001:db8::/129"), CidrCheck::Invalid(_)));
    }

    #[test]
    fn test_port_range() {
        let yaml = r#"
Resources:
  SG:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: web
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 443
          ToPort: 80
          CidrIp: 0.0.0.0/0
        - IpProtocol: tcp
          FromPort: 70000
          ToPort: 70000
          CidrIp: 0.0.0.0/0
        - IpProtocol: "-1"
          FromPort: -1
          ToPort: -1
          CidrIp: 0.0.0.0/0
  TG:
    Type: AWS::ElasticLoadBalancingV2::TargetGroup
    Properties:
      Port: "99999"
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "FromPort 443 is greater than ToPort 80"));
        assert!(has_error(&diags, "port 70000 out of range"));
        assert!(has_error(&diags, "port 99999 out of range"));
        assert_eq!(diags.len(), 4);
    }

    #[test]
    fn test_outputs_refs_and_duplicate_exports() {
        let yaml = r#"
Resources:
  Alb:
    Type: AWS::ElasticLoadBalancingV2::LoadBalancer
Outputs:
  Dns:
    Value: !GetAtt Alb.DNSName
    Export:
      Name: shared
  Other:
    Value: !Ref Ghost
    Export:
      Name: shared
"#;
        let diags = diagnostics(yaml);
        assert!(has_error(&diags, "duplicate export name 'shared'"));
        assert!(has_error(&diags, "'Ghost'"));
        assert_eq!(diags.len(), 2);
    }
}
