//! Template, plan, stack state and event types.
//!
//! Template types mirror the CloudFormation document layout (PascalCase keys).
//! State and event types use snake_case and round-trip through YAML/JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::Value;
use std::fmt;

// ============================================================================
// Template
// ============================================================================

/// A declarative template — the desired state of a stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// Format version marker (only "2010-09-09" is accepted)
    #[serde(rename = "AWSTemplateFormatVersion", default)]
    pub format_version: Option<String>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Opaque template metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Input parameters
    #[serde(default)]
    pub parameters: IndexMap<String, Parameter>,

    /// Static lookup tables (not interpreted)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub mappings: IndexMap<String, Value>,

    /// Named condition expressions (reference-checked only)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub conditions: IndexMap<String, Value>,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, Resource>,

    /// Stack outputs
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

/// A template parameter with its constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub param_type: String,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub allowed_values: Vec<Value>,

    #[serde(default)]
    pub allowed_pattern: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub min_length: Option<u64>,

    #[serde(default)]
    pub max_length: Option<u64>,

    #[serde(default)]
    pub min_value: Option<f64>,

    #[serde(default)]
    pub max_value: Option<f64>,

    #[serde(default)]
    pub constraint_description: Option<String>,

    /// Accepts both `true` and `"true"`
    #[serde(default)]
    pub no_echo: Option<Value>,
}

impl Parameter {
    /// Whether the value must be masked in output.
    pub fn is_no_echo(&self) -> bool {
        match &self.no_echo {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Whether the parameter holds a number (or list of numbers).
    pub fn is_numeric(&self) -> bool {
        self.param_type == "Number"
    }
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    /// Resource type, e.g. `AWS::EC2::VPC`
    #[serde(rename = "Type")]
    pub resource_type: String,

    /// Property values (literals or intrinsic functions)
    #[serde(default)]
    pub properties: IndexMap<String, Value>,

    /// Explicit ordering dependencies
    #[serde(default, skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,

    /// Condition gating the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// What happens when the resource leaves the template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,

    /// What happens to the old resource on replacement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Resource {
    /// Last segment of the type, e.g. `VPC` for `AWS::EC2::VPC`.
    pub fn short_type(&self) -> &str {
        short_type(&self.resource_type)
    }
}

/// Last `::` segment of a resource type.
pub fn short_type(resource_type: &str) -> &str {
    resource_type
        .rsplit("::")
        .next()
        .unwrap_or(resource_type)
}

/// `DependsOn` — single resource name or list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for DependsOn {
    fn default() -> Self {
        Self::Multiple(Vec::new())
    }
}

impl DependsOn {
    /// Expand to a list of resource names.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(_) => false,
            Self::Multiple(v) => v.is_empty(),
        }
    }
}

/// Deletion / replacement policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
    Snapshot,
}

impl DeletionPolicy {
    /// Whether removal from the template leaves the resource in place.
    pub fn retains(self) -> bool {
        matches!(self, Self::Retain | Self::Snapshot)
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
            Self::Snapshot => write!(f, "Snapshot"),
        }
    }
}

/// A stack output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub export: Option<Export>,

    #[serde(default)]
    pub condition: Option<String>,
}

/// Cross-stack export declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Export {
    pub name: Value,
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Replace,
    Delete,
    Retain,
    NoOp,
}

impl ChangeAction {
    /// One-character marker used in plan output.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "±",
            Self::Delete => "-",
            Self::Retain => "=",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Replace => write!(f, "REPLACE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Retain => write!(f, "RETAIN"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    pub resource_id: String,

    pub resource_type: String,

    pub action: ChangeAction,

    /// Human-readable description
    pub description: String,

    /// Top-level properties whose value changed (update/replace only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed_properties: Vec<String>,

    /// Desired-state hash (absent for delete/retain)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Per-property hashes recorded into the lock on apply
    #[serde(skip)]
    pub property_hashes: IndexMap<String, String>,

    /// Resolved resource dependencies
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(skip)]
    pub deletion_policy: DeletionPolicy,
}

/// Full change set for a stack.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    pub stack: String,

    /// Changes in apply order (creates/updates, then deletes)
    pub changes: Vec<PlannedChange>,

    /// Topological order of template resources considered
    pub execution_order: Vec<String>,

    pub to_create: u32,
    pub to_update: u32,
    pub to_replace: u32,
    pub to_delete: u32,
    pub unchanged: u32,
}

impl ChangeSet {
    /// Whether applying this change set would modify anything.
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != ChangeAction::NoOp)
    }
}

// ============================================================================
// Stack state / lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the lock was last written
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 hash of the template file last applied
    #[serde(default)]
    pub template_hash: Option<String>,

    /// Per-resource state, in apply order
    pub resources: IndexMap<String, ResourceLock>,

    /// Rendered output values
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub status: ResourceStatus,

    /// BLAKE3 hash of the desired state last applied
    pub hash: String,

    /// Per-property hashes, used to tell updates from replacements
    #[serde(default)]
    pub property_hashes: IndexMap<String, String>,

    /// Resources this one depended on when applied
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Identifier assigned by the provisioner
    #[serde(default)]
    pub physical_id: Option<String>,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// Resource convergence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Applied,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "APPLIED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Stack event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StackEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        stackplan_version: String,
    },
    ResourceApplied {
        stack: String,
        resource: String,
        action: String,
        hash: Option<String>,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        action: String,
        error: String,
    },
    RollbackStarted {
        stack: String,
        failed_resource: String,
        changes: u32,
    },
    RollbackCompleted {
        stack: String,
        reverted: u32,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        applied: u32,
        unchanged: u32,
        deleted: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: StackEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of applying a change set to a stack.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub stack: String,
    pub applied: u32,
    pub unchanged: u32,
    pub deleted: u32,
    pub retained: u32,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Value helper
// ============================================================================

/// Render a scalar (or list of scalars) as the string a parameter would carry.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Sequence(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parse_minimal() {
        let yaml = r#"
AWSTemplateFormatVersion: "2010-09-09"
Description: test stack
Parameters:
  Env:
    Type: String
    Default: dev
    AllowedValues: [dev, prod]
Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: 10.0.0.0/16
  Subnet:
    Type: AWS::EC2::Subnet
    DependsOn: VPC
    Properties:
      CidrBlock: 10.0.1.0/24
"#;
        let t: Template = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(t.format_version.as_deref(), Some("2010-09-09"));
        assert_eq!(t.parameters["Env"].allowed_values.len(), 2);
        assert_eq!(t.resources.len(), 2);
        assert_eq!(t.resources["Subnet"].depends_on.to_vec(), vec!["VPC"]);
        let keys: Vec<_> = t.resources.keys().collect();
        assert_eq!(keys, vec!["VPC", "Subnet"]);
    }

    #[test]
    fn test_depends_on_list_and_default() {
        let yaml = r#"
Type: AWS::EC2::Route
DependsOn: [A, B]
"#;
        let r: Resource = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(r.depends_on.to_vec(), vec!["A", "B"]);
        assert!(r.properties.is_empty());
        assert!(DependsOn::default().is_empty());
    }

    #[test]
    fn test_short_type() {
        assert_eq!(short_type("AWS::EC2::VPC"), "VPC");
        assert_eq!(
            short_type("AWS::ElasticLoadBalancingV2::TargetGroup"),
            "TargetGroup"
        );
        assert_eq!(short_type("Custom::Thing"), "Thing");
    }

    #[test]
    fn test_deletion_policy_parse() {
        let yaml = r#"
Type: AWS::S3::Bucket
DeletionPolicy: Retain
"#;
        let r: Resource = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(r.deletion_policy, Some(DeletionPolicy::Retain));
        assert!(DeletionPolicy::Retain.retains());
        assert!(DeletionPolicy::Snapshot.retains());
        assert!(!DeletionPolicy::Delete.retains());
    }

    #[test]
    fn test_no_echo_variants() {
        let p: Parameter = serde_yaml_ng::from_str("Type: String\nNoEcho: true").unwrap();
        assert!(p.is_no_echo());
        let p: Parameter = serde_yaml_ng::from_str("Type: String\nNoEcho: \"true\"").unwrap();
        assert!(p.is_no_echo());
        let p: Parameter = serde_yaml_ng::from_str("Type: String").unwrap();
        assert!(!p.is_no_echo());
    }

    #[test]
    fn test_change_action_display_and_symbol() {
        assert_eq!(ChangeAction::Create.to_string(), "CREATE");
        assert_eq!(ChangeAction::NoOp.to_string(), "NO-OP");
        assert_eq!(ChangeAction::Replace.symbol(), "±");
        assert_eq!(ChangeAction::Delete.symbol(), "-");
    }

    #[test]
    fn test_stack_lock_roundtrip() {
        let lock = StackLock {
            schema: "1.0".to_string(),
            stack: "web".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "stackplan 0.1.0".to_string(),
            template_hash: Some("blake3:abc".to_string()),
            resources: IndexMap::from([(
                "VPC".to_string(),
                ResourceLock {
                    resource_type: "AWS::EC2::VPC".to_string(),
                    status: ResourceStatus::Applied,
                    hash: "blake3:123".to_string(),
                    property_hashes: IndexMap::new(),
                    depends_on: vec![],
                    physical_id: Some("vpc-1".to_string()),
                    applied_at: None,
                    deletion_policy: DeletionPolicy::Delete,
                },
            )]),
            outputs: IndexMap::new(),
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        let back: StackLock = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.stack, "web");
        assert_eq!(back.resources["VPC"].status, ResourceStatus::Applied);
        assert_eq!(back.resources["VPC"].physical_id.as_deref(), Some("vpc-1"));
    }

    #[test]
    fn test_stack_event_serde() {
        let event = StackEvent::ApplyStarted {
            stack: "web".to_string(),
            run_id: "r-abc".to_string(),
            stackplan_version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"apply_started\""));
        assert!(json.contains("\"run_id\":\"r-abc\""));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&Value::String("hello".into())), "hello");
        assert_eq!(value_to_string(&Value::Bool(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
        let seq: Value = serde_yaml_ng::from_str("[1, 2, 3]").unwrap();
        assert_eq!(value_to_string(&seq), "1,2,3");
    }
}
