//! Append-only JSONL stack event log.

use crate::core::types::{StackEvent, TimestampedEvent};
use crate::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append an event to the stack's event log.
pub fn append_event(state_dir: &Path, stack: &str, event: StackEvent) -> Result<()> {
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let te = TimestampedEvent {
        ts: now_rfc3339(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| Error::State(e.to_string()))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;

    writeln!(file, "{}", json).map_err(|e| Error::io(&path, e))?;
    tracing::debug!(path = %path.display(), "appended stack event");

    Ok(())
}

/// Read all events for a stack. Missing log yields an empty list.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::parse(format!("{} line {}", path.display(), i + 1), e)
            })
        })
        .collect()
}
