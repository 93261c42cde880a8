use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TripwireError};
use crate::run::GraphHandle;
use crate::service::{ServiceCatalog, ServiceRegistry};
use crate::traits::GraphSpawner;

/// Everything a step may reach while it runs, besides its own fields.
#[derive(Clone)]
pub struct StepContext {
    pub graph_id: String,
    pub graph_name: String,
    pub services: Arc<ServiceRegistry>,
    pub cancel: CancellationToken,
    spawner: Option<Arc<dyn GraphSpawner>>,
}

impl StepContext {
    pub fn new(
        graph_id: impl Into<String>,
        graph_name: impl Into<String>,
        services: Arc<ServiceRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph_id: graph_id.into(),
            graph_name: graph_name.into(),
            services,
            cancel,
            spawner: None,
        }
    }

    /// A context with an empty service registry and no way to fork, for
    /// exercising steps in isolation.
    pub fn detached(graph_id: impl Into<String>, graph_name: impl Into<String>) -> Self {
        let services = Arc::new(ServiceRegistry::new(Arc::new(ServiceCatalog::new())));
        Self::new(graph_id, graph_name, services, CancellationToken::new())
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn GraphSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Start an independent copy of the running graph.
    pub fn fork(
        &self,
        constants: HashMap<String, Value>,
        subgraph: Option<&str>,
    ) -> Result<GraphHandle> {
        let spawner = self.spawner.as_ref().ok_or_else(|| {
            TripwireError::GraphDefinition(format!(
                "graph '{}' cannot be forked from this context",
                self.graph_name
            ))
        })?;
        spawner.fork(constants, subgraph)
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("graph_id", &self.graph_id)
            .field("graph_name", &self.graph_name)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("spawner", &self.spawner.is_some())
            .finish()
    }
}
