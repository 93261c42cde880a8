use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tripwire_core::error::Result;
use tripwire_core::field::FieldValues;
use tripwire_engine::StepDocument;

/// Schema version written by [`StorageBackend::upgrade_if_needed`].
///
/// 1: graph and step tables. 2: `updated_at` on both. 3: graph subgraphs.
pub const SCHEMA_VERSION: u32 = 3;

/// One stored graph. Its chain is found by walking back from `last_step_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: String,
    pub name: String,
    pub last_step_id: Option<String>,
    pub constants: HashMap<String, Value>,
    #[serde(default)]
    pub subgraphs: HashMap<String, Vec<StepDocument>>,
}

/// One stored step, linked to the step before it in its chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub name: String,
    /// Registered step kind; resolved only through the step catalog.
    pub kind: String,
    pub previous_step_id: Option<String>,
    /// Authored inputs, placeholders intact.
    pub inputs: FieldValues,
}

/// Record-level persistence. Implementations know nothing about chains or
/// step behavior; [`crate::GraphManager`] builds those on top.
pub trait StorageBackend: Send + Sync {
    /// Stored schema version, `None` for a store that was never initialised.
    fn schema_version(&self) -> Result<Option<u32>>;

    /// Create or migrate the schema up to [`SCHEMA_VERSION`]. Returns the
    /// version found beforehand, 0 for a fresh store. A version that cannot
    /// be read counts as a fresh store.
    fn upgrade_if_needed(&self) -> Result<u32>;

    fn put_graph(&self, record: &GraphRecord) -> Result<()>;

    fn get_graph(&self, id: &str) -> Result<Option<GraphRecord>>;

    /// Returns whether a record was removed.
    fn remove_graph(&self, id: &str) -> Result<bool>;

    fn put_step(&self, record: &StepRecord) -> Result<()>;

    fn get_step(&self, id: &str) -> Result<Option<StepRecord>>;

    fn remove_step(&self, id: &str) -> Result<bool>;

    /// Every stored graph, ordered by name then id.
    fn list_graphs(&self) -> Result<Vec<GraphRecord>>;
}
