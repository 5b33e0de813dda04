//! Provisioner abstraction — the seam between a change set and the service
//! that realises it.

use crate::core::types::short_type;
use crate::error::Result;
use crate::tripwire::hasher;

/// Result of a provisioning call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Identifier assigned to the resource, when the provisioner issues one
    pub physical_id: Option<String>,
}

/// Realises individual resource changes.
pub trait Provisioner {
    /// Create a resource.
    fn create(&mut self, resource_id: &str, resource_type: &str) -> Result<ProvisionOutcome>;

    /// Update a resource in place, or replace it when `replace` is set.
    fn update(
        &mut self,
        resource_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
        replace: bool,
    ) -> Result<ProvisionOutcome>;

    /// Delete a resource.
    fn delete(
        &mut self,
        resource_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
    ) -> Result<()>;
}

/// One call recorded by [`StateOnly`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create(String),
    Update(String),
    Replace(String),
    Delete(String),
}

/// Records changes in the stack state without contacting any service.
///
/// Physical IDs are derived from the stack, logical ID and generation, so
/// repeated runs produce the same IDs. A replacement is derived from the ID it
/// replaces instead, so it never reuses that ID.
#[derive(Debug, Default)]
pub struct StateOnly {
    stack: String,
    generation: u32,
    operations: Vec<Operation>,
}

impl StateOnly {
    pub fn new(stack: &str) -> Self {
        Self {
            stack: stack.to_string(),
            generation: 0,
            operations: Vec::new(),
        }
    }

    /// Calls made so far, in order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    fn physical_id(&mut self, resource_id: &str, resource_type: &str, replaces: Option<&str>) -> String {
        self.generation += 1;
        let seed = match replaces {
            Some(old) => format!("replaces:{}", old),
            None => self.generation.to_string(),
        };
        let hash = hasher::composite_hash(&[self.stack.as_str(), resource_id, seed.as_str()]);
        let prefix = short_type(resource_type).to_ascii_lowercase();
        format!("{}-{}", prefix, hasher::short_hex(&hash, 12))
    }
}

impl Provisioner for StateOnly {
    fn create(&mut self, resource_id: &str, resource_type: &str) -> Result<ProvisionOutcome> {
        tracing::debug!(resource = resource_id, "state-only create");
        self.operations.push(Operation::Create(resource_id.to_string()));
        Ok(ProvisionOutcome {
            physical_id: Some(self.physical_id(resource_id, resource_type, None)),
        })
    }

    fn update(
        &mut self,
        resource_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
        replace: bool,
    ) -> Result<ProvisionOutcome> {
        tracing::debug!(resource = resource_id, replace, "state-only update");
        if replace {
            self.operations.push(Operation::Replace(resource_id.to_string()));
            return Ok(ProvisionOutcome {
                physical_id: Some(self.physical_id(resource_id, resource_type, physical_id)),
            });
        }
        self.operations.push(Operation::Update(resource_id.to_string()));
        let physical_id = match physical_id {
            Some(id) => id.to_string(),
            None => self.physical_id(resource_id, resource_type, None),
        };
        Ok(ProvisionOutcome {
            physical_id: Some(physical_id),
        })
    }

    fn delete(
        &mut self,
        resource_id: &str,
        _resource_type: &str,
        _physical_id: Option<&str>,
    ) -> Result<()> {
        tracing::debug!(resource = resource_id, "state-only delete");
        self.operations.push(Operation::Delete(resource_id.to_string()));
        Ok(())
    }
}

/// Provisioner that fails on one named resource and otherwise behaves like
/// [`StateOnly`].
#[cfg(test)]
pub struct FailOn {
    pub inner: StateOnly,
    pub resource: String,
}

#[cfg(test)]
impl FailOn {
    pub fn new(stack: &str, resource: &str) -> Self {
        Self {
            inner: StateOnly::new(stack),
            resource: resource.to_string(),
        }
    }

    fn check(&self, resource_id: &str) -> Result<()> {
        if resource_id == self.resource {
            return Err(crate::error::Error::Provision {
                resource: resource_id.to_string(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl Provisioner for FailOn {
    fn create(&mut self, resource_id: &str, resource_type: &str) -> Result<ProvisionOutcome> {
        self.check(resource_id)?;
        self.inner.create(resource_id, resource_type)
    }

    fn update(
        &mut self,
        resource_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
        replace: bool,
    ) -> Result<ProvisionOutcome> {
        self.check(resource_id)?;
        self.inner
            .update(resource_id, resource_type, physical_id, replace)
    }

    fn delete(
        &mut self,
        resource_id: &str,
        resource_type: &str,
        physical_id: Option<&str>,
    ) -> Result<()> {
        self.check(resource_id)?;
        self.inner.delete(resource_id, resource_type, physical_id)
    }
}
