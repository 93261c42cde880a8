pub mod backend;
pub mod manager;
pub mod memory;
pub mod sqlite;

use tripwire_core::config::{StorageConfig, StorageKind};
use tripwire_core::error::Result;
use tripwire_engine::Environment;

pub use backend::{GraphRecord, StepRecord, StorageBackend, SCHEMA_VERSION};
pub use manager::GraphManager;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Open the backend named by the `[storage]` config section.
pub fn open_manager(
    config: &StorageConfig,
    env: Environment,
) -> Result<GraphManager<Box<dyn StorageBackend>>> {
    let backend: Box<dyn StorageBackend> = match config.backend {
        StorageKind::Sqlite => Box::new(SqliteBackend::open(&config.resolved_path())?),
        StorageKind::Memory => Box::new(MemoryBackend::new()),
    };
    GraphManager::new(backend, env)
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn schema_version(&self) -> Result<Option<u32>> {
        (**self).schema_version()
    }

    fn upgrade_if_needed(&self) -> Result<u32> {
        (**self).upgrade_if_needed()
    }

    fn put_graph(&self, record: &GraphRecord) -> Result<()> {
        (**self).put_graph(record)
    }

    fn get_graph(&self, id: &str) -> Result<Option<GraphRecord>> {
        (**self).get_graph(id)
    }

    fn remove_graph(&self, id: &str) -> Result<bool> {
        (**self).remove_graph(id)
    }

    fn put_step(&self, record: &StepRecord) -> Result<()> {
        (**self).put_step(record)
    }

    fn get_step(&self, id: &str) -> Result<Option<StepRecord>> {
        (**self).get_step(id)
    }

    fn remove_step(&self, id: &str) -> Result<bool> {
        (**self).remove_step(id)
    }

    fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        (**self).list_graphs()
    }
}
