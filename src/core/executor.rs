//! Executor — apply and destroy loops with rollback.
//!
//! plan → for each change: provisioner → lock entry → event. A failure undoes
//! the changes made in the same run (newest first) and restores the lock the
//! run started from.

use super::intrinsics;
use super::params::ResolvedParameters;
use super::planner::{self, PlanRequest};
use super::resolver;
use super::state;
use super::types::*;
use crate::error::{Error, Result};
use crate::provisioner::Provisioner;
use crate::tripwire::eventlog;
use indexmap::IndexMap;
use serde_yaml_ng::Value;
use std::path::Path;
use std::time::Instant;

/// Options for an apply run.
pub struct ApplyOptions<'a> {
    pub stack: &'a str,
    pub template: &'a Template,
    /// BLAKE3 hash of the template file, recorded in the lock
    pub template_hash: Option<String>,
    pub params: &'a ResolvedParameters,
    pub state_dir: &'a Path,
    pub targets: &'a [String],
    pub dry_run: bool,
    pub rollback: bool,
}

/// Plan plus, unless this was a dry run, the outcome of executing it.
#[derive(Debug)]
pub struct ApplyReport {
    pub changes: ChangeSet,
    pub result: Option<ApplyResult>,
}

/// A change made during the current run, kept so it can be undone.
struct JournalEntry {
    resource_id: String,
    resource_type: String,
    action: ChangeAction,
    /// Lock entry before the change
    previous: Option<ResourceLock>,
    /// Physical ID after the change
    physical_id: Option<String>,
}

/// Shared context for recording outcomes.
struct RunCtx<'a> {
    stack: &'a str,
    state_dir: &'a Path,
}

impl RunCtx<'_> {
    fn event(&self, event: StackEvent) {
        if let Err(e) = eventlog::append_event(self.state_dir, self.stack, event) {
            tracing::warn!(error = %e, "cannot append stack event");
        }
    }
}

/// Plan and apply a template to a stack.
pub fn apply(opts: &ApplyOptions, provisioner: &mut dyn Provisioner) -> Result<ApplyReport> {
    let start = Instant::now();
    let graph = resolver::build_graph(opts.template);
    let original = state::load_lock(opts.state_dir, opts.stack)?;

    let changes = planner::plan(&PlanRequest {
        stack: opts.stack,
        template: opts.template,
        params: opts.params,
        graph: &graph,
        lock: original.as_ref(),
        targets: opts.targets,
    })?;

    if opts.dry_run {
        return Ok(ApplyReport {
            changes,
            result: None,
        });
    }

    let ctx = RunCtx {
        stack: opts.stack,
        state_dir: opts.state_dir,
    };
    let run_id = eventlog::generate_run_id();
    tracing::info!(stack = opts.stack, run_id = %run_id, "apply started");
    ctx.event(StackEvent::ApplyStarted {
        stack: opts.stack.to_string(),
        run_id: run_id.clone(),
        stackplan_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut lock = original
        .clone()
        .unwrap_or_else(|| state::new_lock(opts.stack));
    let mut journal: Vec<JournalEntry> = Vec::new();
    let mut result = ApplyResult {
        stack: opts.stack.to_string(),
        applied: 0,
        unchanged: 0,
        deleted: 0,
        retained: 0,
        total_duration: Default::default(),
    };

    for change in &changes.changes {
        if change.action == ChangeAction::NoOp {
            result.unchanged += 1;
            continue;
        }

        let previous = lock.resources.get(&change.resource_id).cloned();
        match apply_change(provisioner, change, previous.as_ref()) {
            Ok(physical_id) => {
                record_success(&mut lock, change, physical_id.clone());
                match change.action {
                    ChangeAction::Delete => result.deleted += 1,
                    ChangeAction::Retain => result.retained += 1,
                    _ => result.applied += 1,
                }
                tracing::info!(resource = %change.resource_id, action = %change.action, "applied");
                ctx.event(StackEvent::ResourceApplied {
                    stack: opts.stack.to_string(),
                    resource: change.resource_id.clone(),
                    action: change.action.to_string(),
                    hash: change.hash.clone(),
                });
                journal.push(JournalEntry {
                    resource_id: change.resource_id.clone(),
                    resource_type: change.resource_type.clone(),
                    action: change.action,
                    previous,
                    physical_id,
                });
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(resource = %change.resource_id, error = %message, "change failed");
                ctx.event(StackEvent::ResourceFailed {
                    stack: opts.stack.to_string(),
                    resource: change.resource_id.clone(),
                    action: change.action.to_string(),
                    error: message.clone(),
                });

                if opts.rollback {
                    let mut restored = original.clone();
                    let reverted = rollback(
                        &ctx,
                        provisioner,
                        &journal,
                        &change.resource_id,
                        restored.as_mut(),
                    );
                    match &restored {
                        Some(restored) => state::save_lock(opts.state_dir, restored)?,
                        None => state::remove_lock(opts.state_dir, opts.stack)?,
                    }
                    return Err(Error::RolledBack {
                        resource: change.resource_id.clone(),
                        reverted,
                        message,
                    });
                }

                record_failure(&mut lock, change);
                lock.generated_at = eventlog::now_rfc3339();
                state::save_lock(opts.state_dir, &lock)?;
                return Err(Error::Provision {
                    resource: change.resource_id.clone(),
                    message,
                });
            }
        }
    }

    lock.template_hash = opts.template_hash.clone();
    lock.outputs = render_outputs(opts.template, &lock, opts.params);
    lock.generated_at = eventlog::now_rfc3339();
    state::save_lock(opts.state_dir, &lock)?;

    result.total_duration = start.elapsed();
    tracing::info!(
        stack = opts.stack,
        applied = result.applied,
        deleted = result.deleted,
        unchanged = result.unchanged,
        "apply completed"
    );
    ctx.event(StackEvent::ApplyCompleted {
        stack: opts.stack.to_string(),
        run_id,
        applied: result.applied,
        unchanged: result.unchanged,
        deleted: result.deleted + result.retained,
        total_seconds: result.total_duration.as_secs_f64(),
    });

    Ok(ApplyReport {
        changes,
        result: Some(result),
    })
}

/// Delete every resource tracked for a stack, honouring `Retain`.
pub fn destroy(
    stack: &str,
    state_dir: &Path,
    dry_run: bool,
    provisioner: &mut dyn Provisioner,
) -> Result<ApplyReport> {
    let start = Instant::now();
    let Some(mut lock) = state::load_lock(state_dir, stack)? else {
        return Err(Error::State(format!("no state found for stack '{}'", stack)));
    };
    let changes = planner::plan_destroy(&lock);
    if dry_run {
        return Ok(ApplyReport {
            changes,
            result: None,
        });
    }

    let ctx = RunCtx { stack, state_dir };
    let run_id = eventlog::generate_run_id();
    ctx.event(StackEvent::ApplyStarted {
        stack: stack.to_string(),
        run_id: run_id.clone(),
        stackplan_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut result = ApplyResult {
        stack: stack.to_string(),
        applied: 0,
        unchanged: 0,
        deleted: 0,
        retained: 0,
        total_duration: Default::default(),
    };

    for change in &changes.changes {
        let previous = lock.resources.get(&change.resource_id).cloned();
        if let Err(e) = apply_change(provisioner, change, previous.as_ref()) {
            let message = e.to_string();
            ctx.event(StackEvent::ResourceFailed {
                stack: stack.to_string(),
                resource: change.resource_id.clone(),
                action: change.action.to_string(),
                error: message.clone(),
            });
            lock.generated_at = eventlog::now_rfc3339();
            state::save_lock(state_dir, &lock)?;
            return Err(Error::Provision {
                resource: change.resource_id.clone(),
                message,
            });
        }
        lock.resources.shift_remove(&change.resource_id);
        if change.action == ChangeAction::Retain {
            result.retained += 1;
        } else {
            result.deleted += 1;
        }
        ctx.event(StackEvent::ResourceApplied {
            stack: stack.to_string(),
            resource: change.resource_id.clone(),
            action: change.action.to_string(),
            hash: None,
        });
    }

    state::remove_lock(state_dir, stack)?;
    result.total_duration = start.elapsed();
    tracing::info!(stack, deleted = result.deleted, retained = result.retained, "stack destroyed");
    ctx.event(StackEvent::ApplyCompleted {
        stack: stack.to_string(),
        run_id,
        applied: 0,
        unchanged: 0,
        deleted: result.deleted + result.retained,
        total_seconds: result.total_duration.as_secs_f64(),
    });

    Ok(ApplyReport {
        changes,
        result: Some(result),
    })
}

/// Run one change through the provisioner. Returns the resulting physical ID.
fn apply_change(
    provisioner: &mut dyn Provisioner,
    change: &PlannedChange,
    previous: Option<&ResourceLock>,
) -> Result<Option<String>> {
    let id = change.resource_id.as_str();
    let rtype = change.resource_type.as_str();
    let prev_physical = previous.and_then(|p| p.physical_id.as_deref());
    match change.action {
        ChangeAction::Create => Ok(provisioner.create(id, rtype)?.physical_id),
        ChangeAction::Update => Ok(provisioner.update(id, rtype, prev_physical, false)?.physical_id),
        ChangeAction::Replace => Ok(provisioner.update(id, rtype, prev_physical, true)?.physical_id),
        ChangeAction::Delete => {
            provisioner.delete(id, rtype, prev_physical)?;
            Ok(None)
        }
        ChangeAction::Retain => Ok(None),
        ChangeAction::NoOp => Ok(prev_physical.map(str::to_string)),
    }
}

/// Record a successful change into the lock.
fn record_success(lock: &mut StackLock, change: &PlannedChange, physical_id: Option<String>) {
    match change.action {
        ChangeAction::Delete | ChangeAction::Retain => {
            lock.resources.shift_remove(&change.resource_id);
        }
        _ => {
            lock.resources.insert(
                change.resource_id.clone(),
                ResourceLock {
                    resource_type: change.resource_type.clone(),
                    status: ResourceStatus::Applied,
                    hash: change.hash.clone().unwrap_or_default(),
                    property_hashes: change.property_hashes.clone(),
                    depends_on: change.depends_on.clone(),
                    physical_id,
                    applied_at: Some(eventlog::now_rfc3339()),
                    deletion_policy: change.deletion_policy,
                },
            );
        }
    }
}

/// Mark a resource failed so the next plan retries it.
fn record_failure(lock: &mut StackLock, change: &PlannedChange) {
    if let Some(entry) = lock.resources.get_mut(&change.resource_id) {
        entry.status = ResourceStatus::Failed;
        return;
    }
    lock.resources.insert(
        change.resource_id.clone(),
        ResourceLock {
            resource_type: change.resource_type.clone(),
            status: ResourceStatus::Failed,
            hash: change.hash.clone().unwrap_or_default(),
            property_hashes: change.property_hashes.clone(),
            depends_on: change.depends_on.clone(),
            physical_id: None,
            applied_at: Some(eventlog::now_rfc3339()),
            deletion_policy: change.deletion_policy,
        },
    );
}

/// Undo journaled changes, newest first. Returns how many were reverted.
///
/// Physical IDs issued while undoing a delete or replace are written into
/// `restored`. Undo failures are logged and skipped.
fn rollback(
    ctx: &RunCtx,
    provisioner: &mut dyn Provisioner,
    journal: &[JournalEntry],
    failed_resource: &str,
    mut restored: Option<&mut StackLock>,
) -> usize {
    tracing::warn!(stack = ctx.stack, changes = journal.len(), "rolling back");
    ctx.event(StackEvent::RollbackStarted {
        stack: ctx.stack.to_string(),
        failed_resource: failed_resource.to_string(),
        changes: journal.len() as u32,
    });

    let mut reverted = 0;
    for entry in journal.iter().rev() {
        let id = entry.resource_id.as_str();
        let undo = match (entry.action, &entry.previous) {
            (ChangeAction::Create, _) => provisioner
                .delete(id, &entry.resource_type, entry.physical_id.as_deref())
                .map(|()| None),
            (ChangeAction::Update, Some(prev)) => provisioner
                .update(id, &prev.resource_type, entry.physical_id.as_deref(), false)
                .map(|o| o.physical_id),
            (ChangeAction::Replace, Some(prev)) => provisioner
                .update(id, &prev.resource_type, entry.physical_id.as_deref(), true)
                .map(|o| o.physical_id),
            (ChangeAction::Delete, Some(prev)) => provisioner
                .create(id, &prev.resource_type)
                .map(|o| o.physical_id),
            _ => Ok(None),
        };
        match undo {
            Ok(physical_id) => {
                tracing::debug!(resource = id, action = %entry.action, "reverted");
                reverted += 1;
                let entry_lock = restored.as_mut().and_then(|lock| lock.resources.get_mut(id));
                if let (Some(entry_lock), Some(physical_id)) = (entry_lock, physical_id) {
                    entry_lock.physical_id = Some(physical_id);
                }
            }
            Err(e) => tracing::warn!(resource = id, error = %e, "cannot revert change"),
        }
    }

    ctx.event(StackEvent::RollbackCompleted {
        stack: ctx.stack.to_string(),
        reverted: reverted as u32,
    });
    reverted
}

/// Render template outputs against the applied state.
///
/// `Ref` to a resource yields its physical ID, `Ref` to a parameter its
/// (masked, if `NoEcho`) value. `GetAtt` renders as `physical-id.Attribute`.
pub fn render_outputs(
    template: &Template,
    lock: &StackLock,
    params: &ResolvedParameters,
) -> IndexMap<String, String> {
    template
        .outputs
        .iter()
        .map(|(name, output)| (name.clone(), render_value(&output.value, lock, params)))
        .collect()
}

fn render_value(value: &Value, lock: &StackLock, params: &ResolvedParameters) -> String {
    if let Some((key, arg)) = intrinsics::as_intrinsic(value) {
        match key {
            "Ref" => {
                if let Some(name) = arg.as_str() {
                    return lookup(name, None, lock, params);
                }
            }
            "Fn::GetAtt" => {
                if let Some([res, attr]) = arg.as_sequence().map(Vec::as_slice) {
                    if let (Some(res), Some(attr)) = (res.as_str(), attr.as_str()) {
                        return lookup(res, Some(attr), lock, params);
                    }
                }
            }
            "Fn::Sub" => {
                if let Some(text) = arg.as_str() {
                    let mut out = text.to_string();
                    for var in intrinsics::sub_variables(text) {
                        let rendered = match var.split_once('.') {
                            Some((res, attr)) => lookup(res, Some(attr), lock, params),
                            None => lookup(&var, None, lock, params),
                        };
                        out = out.replace(&format!("${{{}}}", var), &rendered);
                    }
                    return out;
                }
            }
            _ => {}
        }
    }
    match value {
        Value::Mapping(_) | Value::Sequence(_) => planner::canonical_json(value),
        other => value_to_string(other),
    }
}

fn lookup(name: &str, attribute: Option<&str>, lock: &StackLock, params: &ResolvedParameters) -> String {
    if let Some(entry) = lock.resources.get(name) {
        let id = entry.physical_id.as_deref().unwrap_or(name);
        return match attribute {
            Some(attr) => format!("{}.{}", id, attr),
            None => id.to_string(),
        };
    }
    params.display_value(name).unwrap_or(name).to_string()
}
