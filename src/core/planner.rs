//! Change-set generation — diff the template's desired state against the
//! stack lock.

use super::intrinsics;
use super::params::ResolvedParameters;
use super::resolver::{self, DependencyGraph};
use super::types::*;
use crate::error::{Error, Result};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde_yaml_ng::Value;

/// Everything needed to plan one stack.
pub struct PlanRequest<'a> {
    pub stack: &'a str,
    pub template: &'a Template,
    pub params: &'a ResolvedParameters,
    pub graph: &'a DependencyGraph,
    pub lock: Option<&'a StackLock>,
    /// Restrict to these resources (plus their dependencies); empty = all
    pub targets: &'a [String],
}

/// Hashes describing a resource's desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub hash: String,
    pub property_hashes: IndexMap<String, String>,
}

/// Generate a change set.
pub fn plan(req: &PlanRequest) -> Result<ChangeSet> {
    for target in req.targets {
        if !req.template.resources.contains_key(target) {
            return Err(Error::UnknownResource(target.clone()));
        }
    }

    let full_order = req.graph.execution_order()?;
    let execution_order: Vec<String> = if req.targets.is_empty() {
        full_order
    } else {
        let scope = req.graph.dependency_closure(req.targets);
        full_order.into_iter().filter(|id| scope.contains(id)).collect()
    };

    let mut changes = Vec::new();
    for resource_id in &execution_order {
        let Some(resource) = req.template.resources.get(resource_id) else {
            continue;
        };
        let depends_on = req.graph.dependencies_of(resource_id);
        let desired = desired_state(resource, req.params, &depends_on);
        let previous = req.lock.and_then(|l| l.resources.get(resource_id));
        let (action, changed_properties) = determine_action(resource, &desired, previous);
        let description = describe_action(resource_id, &resource.resource_type, action, &changed_properties);

        changes.push(PlannedChange {
            resource_id: resource_id.clone(),
            resource_type: resource.resource_type.clone(),
            action,
            description,
            changed_properties,
            hash: Some(desired.hash),
            property_hashes: desired.property_hashes,
            depends_on,
            deletion_policy: resource.deletion_policy.unwrap_or_default(),
        });
    }

    // Targeted plans never delete
    if let Some(lock) = req.lock.filter(|_| req.targets.is_empty()) {
        let removed = deletion_order(lock, |id| !req.template.resources.contains_key(id));
        for id in removed {
            let entry = &lock.resources[&id];
            changes.push(removal_change(&id, entry));
        }
    }

    let mut cs = ChangeSet {
        stack: req.stack.to_string(),
        changes,
        execution_order,
        to_create: 0,
        to_update: 0,
        to_replace: 0,
        to_delete: 0,
        unchanged: 0,
    };
    tally(&mut cs);
    tracing::info!(
        stack = req.stack,
        create = cs.to_create,
        update = cs.to_update,
        replace = cs.to_replace,
        delete = cs.to_delete,
        unchanged = cs.unchanged,
        "planned change set"
    );
    Ok(cs)
}

/// Plan the removal of every resource tracked in a lock.
pub fn plan_destroy(lock: &StackLock) -> ChangeSet {
    let changes: Vec<PlannedChange> = deletion_order(lock, |_| true)
        .into_iter()
        .map(|id| removal_change(&id, &lock.resources[&id]))
        .collect();
    let mut cs = ChangeSet {
        stack: lock.stack.clone(),
        execution_order: changes.iter().map(|c| c.resource_id.clone()).collect(),
        changes,
        to_create: 0,
        to_update: 0,
        to_replace: 0,
        to_delete: 0,
        unchanged: 0,
    };
    tally(&mut cs);
    cs
}

fn removal_change(id: &str, entry: &ResourceLock) -> PlannedChange {
    let action = if entry.deletion_policy.retains() {
        ChangeAction::Retain
    } else {
        ChangeAction::Delete
    };
    PlannedChange {
        resource_id: id.to_string(),
        resource_type: entry.resource_type.clone(),
        action,
        description: describe_action(id, &entry.resource_type, action, &[]),
        changed_properties: Vec::new(),
        hash: None,
        property_hashes: IndexMap::new(),
        depends_on: entry.depends_on.clone(),
        deletion_policy: entry.deletion_policy,
    }
}

/// Lock resources matching `keep`, dependents before their dependencies.
fn deletion_order(lock: &StackLock, keep: impl Fn(&str) -> bool) -> Vec<String> {
    let graph = resolver::graph_from_lock(lock);
    let order = match graph.execution_order() {
        Ok(order) => order,
        Err(e) => {
            tracing::warn!(error = %e, "lock dependencies are cyclic; deleting in reverse lock order");
            lock.resources.keys().cloned().collect()
        }
    };
    order.into_iter().rev().filter(|id| keep(id.as_str())).collect()
}

fn tally(cs: &mut ChangeSet) {
    for change in &cs.changes {
        match change.action {
            ChangeAction::Create => cs.to_create += 1,
            ChangeAction::Update => cs.to_update += 1,
            ChangeAction::Replace => cs.to_replace += 1,
            ChangeAction::Delete | ChangeAction::Retain => cs.to_delete += 1,
            ChangeAction::NoOp => cs.unchanged += 1,
        }
    }
}

/// Decide the action for a template resource given its lock entry.
fn determine_action(
    resource: &Resource,
    desired: &DesiredState,
    previous: Option<&ResourceLock>,
) -> (ChangeAction, Vec<String>) {
    let Some(prev) = previous else {
        return (ChangeAction::Create, Vec::new());
    };

    if prev.status == ResourceStatus::Applied && prev.hash == desired.hash {
        return (ChangeAction::NoOp, Vec::new());
    }

    // Type change always replaces
    if prev.resource_type != resource.resource_type {
        return (ChangeAction::Replace, vec!["Type".to_string()]);
    }

    let changed = changed_properties(&prev.property_hashes, &desired.property_hashes);
    let replacing = replacement_properties(&resource.resource_type);
    if changed.iter().any(|p| replacing.contains(&p.as_str())) {
        return (ChangeAction::Replace, changed);
    }
    (ChangeAction::Update, changed)
}

fn changed_properties(
    previous: &IndexMap<String, String>,
    desired: &IndexMap<String, String>,
) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(k, h)| previous.get(*k) != Some(*h))
        .map(|(k, _)| k.clone())
        .collect();
    changed.extend(
        previous
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned(),
    );
    changed
}

/// Properties whose change forces a new resource.
pub fn replacement_properties(resource_type: &str) -> &'static [&'static str] {
    match resource_type {
        "AWS::EC2::VPC" => &["CidrBlock", "InstanceTenancy"],
        "AWS::EC2::Subnet" => &["AvailabilityZone", "CidrBlock", "Ipv6CidrBlock", "VpcId"],
        "AWS::EC2::RouteTable" => &["VpcId"],
        "AWS::EC2::Route" => &["DestinationCidrBlock", "RouteTableId"],
        "AWS::EC2::SubnetRouteTableAssociation" => &["SubnetId"],
        "AWS::EC2::VPCGatewayAttachment" => &["VpcId"],
        "AWS::EC2::SecurityGroup" => &["GroupDescription", "GroupName", "VpcId"],
        "AWS::EC2::Instance" => &["AvailabilityZone", "ImageId", "KeyName", "SubnetId"],
        "AWS::ElasticLoadBalancingV2::LoadBalancer" => &["Name", "Scheme", "Type"],
        "AWS::ElasticLoadBalancingV2::TargetGroup" => {
            &["Name", "Port", "Protocol", "TargetType", "VpcId"]
        }
        "AWS::ElasticLoadBalancingV2::Listener" => &["LoadBalancerArn"],
        _ => &[],
    }
}

/// Compute the desired-state hashes of a resource.
///
/// Parameter references are substituted first, so changing a parameter value
/// changes the hash of every resource that reads it. Property key order does
/// not affect the hash.
pub fn desired_state(
    resource: &Resource,
    params: &ResolvedParameters,
    depends_on: &[String],
) -> DesiredState {
    let mut property_hashes = IndexMap::new();
    for (key, value) in &resource.properties {
        let resolved = intrinsics::substitute_parameters(value, params.values());
        property_hashes.insert(key.clone(), hasher::hash_string(&canonical_json(&resolved)));
    }

    let mut components: Vec<String> = vec![resource.resource_type.clone()];
    let mut keys: Vec<&String> = property_hashes.keys().collect();
    keys.sort();
    for key in keys {
        components.push(format!("{}={}", key, property_hashes[key]));
    }
    let mut deps = depends_on.to_vec();
    deps.sort();
    components.push(format!("depends_on={}", deps.join(",")));

    let refs: Vec<&str> = components.iter().map(String::as_str).collect();
    DesiredState {
        hash: hasher::composite_hash(&refs),
        property_hashes,
    }
}

/// Key-sorted JSON rendering of a value.
pub fn canonical_json(value: &Value) -> String {
    match serde_json::to_value(value) {
        Ok(json) => json.to_string(),
        Err(_) => format!("{:?}", value),
    }
}

/// Human-readable description of a planned action.
fn describe_action(
    resource_id: &str,
    resource_type: &str,
    action: ChangeAction,
    changed: &[String],
) -> String {
    match action {
        ChangeAction::Create => format!("{}: create {}", resource_id, resource_type),
        ChangeAction::Update => {
            if changed.is_empty() {
                format!("{}: update (retry)", resource_id)
            } else {
                format!("{}: update ({})", resource_id, changed.join(", "))
            }
        }
        ChangeAction::Replace => {
            format!("{}: replace ({})", resource_id, changed.join(", "))
        }
        ChangeAction::Delete => format!("{}: delete {}", resource_id, resource_type),
        ChangeAction::Retain => format!(
            "{}: retain {} (removed from stack only)",
            resource_id, resource_type
        ),
        ChangeAction::NoOp => format!("{}: no changes", resource_id),
    }
}
