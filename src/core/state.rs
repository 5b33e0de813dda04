//! Stack lock management — load, save (atomic), path derivation.

use super::types::StackLock;
use crate::error::{Error, Result};
use crate::tripwire::eventlog::now_rfc3339;
use std::path::{Path, PathBuf};

/// Lock file name inside a stack's state directory.
pub const LOCK_FILE: &str = "stack.lock.yaml";

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join(LOCK_FILE)
}

/// Load the lock file for a stack. Returns None if it doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StackLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::parse(path.display().to_string(), e))?;
    tracing::debug!(stack, resources = lock.resources.len(), "loaded stack lock");
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| Error::State(e.to_string()))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(|e| Error::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| Error::io(&path, e))?;

    tracing::debug!(path = %path.display(), "saved stack lock");
    Ok(())
}

/// Remove a stack's lock file, if present.
pub fn remove_lock(state_dir: &Path, stack: &str) -> Result<()> {
    let path = lock_file_path(state_dir, stack);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
    }
    Ok(())
}

/// Create a new empty lock for a stack.
pub fn new_lock(stack: &str) -> StackLock {
    StackLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_rfc3339(),
        generator: format!("stackplan {}", env!("CARGO_PKG_VERSION")),
        template_hash: None,
        resources: indexmap::IndexMap::new(),
        outputs: indexmap::IndexMap::new(),
    }
}

/// Names of stacks with a lock file under `state_dir`, sorted.
pub fn list_stacks(state_dir: &Path) -> Result<Vec<String>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir).map_err(|e| Error::io(state_dir, e))?;
    let mut stacks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(state_dir, e))?;
        if entry.path().join(LOCK_FILE).exists() {
            stacks.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    stacks.sort();
    Ok(stacks)
}
