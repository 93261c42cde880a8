use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Result, TripwireError};
use crate::step::{Step, StepDescriptor};

/// Builds a fresh behavior instance for a registered step kind.
pub type StepFactory = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    descriptor: &'static StepDescriptor,
    factory: StepFactory,
}

/// Closed allow-list of step kinds, keyed by kind name.
///
/// Definition loading and storage reconstruction resolve kinds only through
/// this map; an unknown name fails instead of being guessed at.
#[derive(Default)]
pub struct StepCatalog {
    entries: Mutex<HashMap<&'static str, Entry>>,
}

impl StepCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step kind. A kind can only be registered once.
    pub fn register<F>(&self, descriptor: &'static StepDescriptor, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        if entries.contains_key(descriptor.kind) {
            return Err(TripwireError::GraphDefinition(format!(
                "step kind '{}' is already registered",
                descriptor.kind
            )));
        }
        debug!(kind = descriptor.kind, class = %descriptor.class, "Step kind registered");
        entries.insert(
            descriptor.kind,
            Entry {
                descriptor,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(kind))
            .unwrap_or(false)
    }

    pub fn descriptor(&self, kind: &str) -> Option<&'static StepDescriptor> {
        self.entries
            .lock()
            .ok()
            .and_then(|e| e.get(kind).map(|entry| entry.descriptor))
    }

    /// Instantiate `kind`, or `None` if it is not registered.
    pub fn instantiate(&self, kind: &str) -> Result<Option<Box<dyn Step>>> {
        let factory = {
            let entries = self
                .entries
                .lock()
                .map_err(|e| TripwireError::Lock(e.to_string()))?;
            entries.get(kind).map(|entry| Arc::clone(&entry.factory))
        };
        Ok(factory.map(|build| build()))
    }

    /// All registered descriptors, sorted by kind.
    pub fn descriptors(&self) -> Vec<&'static StepDescriptor> {
        let mut all: Vec<&'static StepDescriptor> = self
            .entries
            .lock()
            .map(|e| e.values().map(|entry| entry.descriptor).collect())
            .unwrap_or_default();
        all.sort_by_key(|d| d.kind);
        all
    }
}
