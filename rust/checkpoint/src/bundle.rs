//! State bundles: the serialized trainable state of one run.

use std::collections::BTreeMap;

/// Model parameters.
pub const MODEL: &str = "model";
/// Optimizer state (moments, step counts).
pub const OPTIMIZER: &str = "optimizer";
/// Learning-rate scheduler state.
pub const SCHEDULER: &str = "scheduler";
/// Exponential-moving-average shadow parameters.
pub const EMA: &str = "ema";

/// A collaborator whose state is checkpointed and restored by name.
pub trait StatefulComponent {
    fn name(&self) -> &'static str;

    fn state_bytes(&self) -> Result<Vec<u8>, ComponentError>;

    fn load_state(&mut self, bytes: &[u8]) -> Result<(), ComponentError>;
}

/// Failure inside a collaborator's serialize/restore hook.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ComponentError(pub String);

/// Named opaque payloads making up one checkpoint.
#[derive(Debug, Clone, Default)]
pub struct StateBundle {
    components: BTreeMap<String, Vec<u8>>,
}

impl StateBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the current state of every component into a bundle.
    pub fn snapshot(components: &[&dyn StatefulComponent]) -> Result<Self, ComponentError> {
        let mut bundle = Self::new();
        for component in components {
            bundle.insert(component.name(), component.state_bytes()?);
        }
        Ok(bundle)
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.components.insert(name.into(), bytes);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.components.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.components
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }
}

/// The component set a run's configuration promises to checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedComponents {
    /// Must be present in any checkpoint this run accepts.
    pub required: Vec<&'static str>,
    /// Restored when present; initialized fresh under non-strict loading.
    pub optional: Vec<&'static str>,
}

impl ExpectedComponents {
    /// The set for a run: model + optimizer + scheduler, plus the EMA shadow
    /// when enabled.
    #[must_use]
    pub fn for_run(use_ema: bool) -> Self {
        Self {
            required: vec![MODEL, OPTIMIZER, SCHEDULER],
            optional: if use_ema { vec![EMA] } else { Vec::new() },
        }
    }

    /// Every expected name, required first.
    #[must_use]
    pub fn all(&self) -> Vec<&'static str> {
        let mut names = self.required.clone();
        names.extend(&self.optional);
        names
    }
}
