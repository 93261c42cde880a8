use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use tripwire_core::error::{Result, TripwireError};

use crate::backend::{GraphRecord, StepRecord, StorageBackend, SCHEMA_VERSION};

#[derive(Debug, Default)]
struct Tables {
    version: Option<u32>,
    graphs: HashMap<String, GraphRecord>,
    steps: HashMap<String, StepRecord>,
}

/// Process-local backend. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that claims an older schema, for exercising upgrades.
    pub fn at_version(version: u32) -> Self {
        Self {
            tables: Mutex::new(Tables {
                version: Some(version),
                ..Tables::default()
            }),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| TripwireError::Database(e.to_string()))
    }

    /// Lock for a data operation; the schema must be initialised first.
    fn ready(&self) -> Result<MutexGuard<'_, Tables>> {
        let tables = self.tables()?;
        match tables.version {
            Some(v) if v >= SCHEMA_VERSION => Ok(tables),
            found => Err(TripwireError::Storage(format!(
                "schema at {found:?}, expected {SCHEMA_VERSION}; call upgrade_if_needed first"
            ))),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn schema_version(&self) -> Result<Option<u32>> {
        Ok(self.tables()?.version)
    }

    fn upgrade_if_needed(&self) -> Result<u32> {
        let mut tables = self.tables()?;
        let found = tables.version.unwrap_or(0);
        if found < SCHEMA_VERSION {
            debug!(from = found, to = SCHEMA_VERSION, "Upgrading in-memory schema");
            tables.version = Some(SCHEMA_VERSION);
        }
        Ok(found)
    }

    fn put_graph(&self, record: &GraphRecord) -> Result<()> {
        self.ready()?
            .graphs
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get_graph(&self, id: &str) -> Result<Option<GraphRecord>> {
        Ok(self.ready()?.graphs.get(id).cloned())
    }

    fn remove_graph(&self, id: &str) -> Result<bool> {
        Ok(self.ready()?.graphs.remove(id).is_some())
    }

    fn put_step(&self, record: &StepRecord) -> Result<()> {
        self.ready()?
            .steps
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get_step(&self, id: &str) -> Result<Option<StepRecord>> {
        Ok(self.ready()?.steps.get(id).cloned())
    }

    fn remove_step(&self, id: &str) -> Result<bool> {
        Ok(self.ready()?.steps.remove(id).is_some())
    }

    fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        let mut graphs: Vec<GraphRecord> = self.ready()?.graphs.values().cloned().collect();
        graphs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(graphs)
    }
}
