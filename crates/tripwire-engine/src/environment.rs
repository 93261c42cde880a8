use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use tripwire_core::catalog::StepCatalog;
use tripwire_core::config::AppConfig;
use tripwire_core::service::ServiceRegistry;

use crate::graph::GraphOptions;

/// Process-wide pieces every graph is built against.
#[derive(Clone)]
pub struct Environment {
    pub catalog: Arc<StepCatalog>,
    pub services: Arc<ServiceRegistry>,
    pub globals: Arc<HashMap<String, Value>>,
    pub options: GraphOptions,
}

impl Environment {
    pub fn new(catalog: Arc<StepCatalog>, services: Arc<ServiceRegistry>) -> Self {
        Self {
            catalog,
            services,
            globals: Arc::new(HashMap::new()),
            options: GraphOptions::default(),
        }
    }

    /// Globals and run options taken from the app config.
    pub fn from_config(
        config: &AppConfig,
        catalog: Arc<StepCatalog>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        Self::new(catalog, services)
            .with_globals(config.globals.clone())
            .with_options(GraphOptions::from(&config.engine))
    }

    pub fn with_globals(mut self, globals: HashMap<String, Value>) -> Self {
        self.globals = Arc::new(globals);
        self
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.options = options;
        self
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("kinds", &self.catalog.descriptors().len())
            .field("globals", &self.globals.len())
            .field("options", &self.options)
            .finish()
    }
}
