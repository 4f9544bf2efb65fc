//! Named policy storage
//!
//! Maps case-sensitive names to realized policy instances. Registration is
//! a setup-time activity and fails fast on misuse (duplicate name, invalid
//! options) without mutating the registry; resolution is the steady-state
//! hot path and never blocks concurrent readers.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::executor::{CompositePolicy, PolicyInstance};
use super::PolicyDescriptor;
use crate::error::{PipelineError, PipelineResult};

/// Registry of named, realized policy instances
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: DashMap<String, Arc<PolicyInstance>>,
}

impl PolicyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Realize a descriptor and store it under `name`
    ///
    /// Fails with [`PipelineError::DuplicateName`] if the name is taken and
    /// with [`PipelineError::InvalidConfiguration`] if the descriptor's
    /// options are invalid; in both cases the registry is left untouched.
    pub fn register(&self, name: impl Into<String>, descriptor: &PolicyDescriptor) -> PipelineResult<()> {
        let instance = descriptor.realize()?;
        self.register_instance(name, instance)
    }

    /// Store an already-realized instance under `name`
    ///
    /// Used for policies that cannot be expressed as pure configuration,
    /// e.g. a fallback with a programmatic supplier.
    pub fn register_instance(
        &self,
        name: impl Into<String>,
        instance: PolicyInstance,
    ) -> PipelineResult<()> {
        let name = name.into();
        match self.policies.entry(name) {
            Entry::Occupied(occupied) => {
                Err(PipelineError::DuplicateName { name: occupied.key().clone() })
            }
            Entry::Vacant(vacant) => {
                debug!(name = %vacant.key(), kind = %instance.kind(), "policy registered");
                vacant.insert(Arc::new(instance));
                Ok(())
            }
        }
    }

    /// Look up a policy by name
    pub fn resolve(&self, name: &str) -> PipelineResult<Arc<PolicyInstance>> {
        self.policies
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PipelineError::NotFound { name: name.to_string() })
    }

    /// Whether a policy is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Number of registered policies
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Collapse the named policies into one composite, outermost first
    ///
    /// The order is exactly the caller's order — nothing is inferred. An
    /// empty list yields a pass-through composite. Resolution failures
    /// surface before any execution happens.
    pub fn compose<S: AsRef<str>>(&self, names: &[S]) -> PipelineResult<CompositePolicy> {
        let mut layers = Vec::with_capacity(names.len());
        for name in names {
            layers.push(self.resolve(name.as_ref())?);
        }
        Ok(CompositePolicy::new(layers))
    }
}
