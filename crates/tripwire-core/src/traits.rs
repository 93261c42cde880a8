use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::run::GraphHandle;

/// Process-wide shared singleton with an explicit lifecycle.
///
/// Implementations guard their own started flag; `start` and `stop` must be
/// idempotent. See [`crate::service::Lifecycle`].
pub trait Service: Send + Sync + 'static {
    /// Registry key.
    fn name(&self) -> &str;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn is_started(&self) -> bool;

    /// Upcast for [`crate::service::ServiceRegistry::lookup_as`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Starts independent runs of a graph blueprint.
pub trait GraphSpawner: Send + Sync + 'static {
    /// Spawn a new run with `constants` as its `graph.*` namespace, using the
    /// named alternate chain when `subgraph` is given.
    fn fork(&self, constants: HashMap<String, Value>, subgraph: Option<&str>)
        -> Result<GraphHandle>;
}
