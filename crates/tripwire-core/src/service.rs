use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, TripwireError};
use crate::traits::Service;

/// Builds a service instance from constructor arguments.
pub type ServiceFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Service>> + Send + Sync>;

/// Idempotent, internally locked started flag for [`Service`] implementations.
#[derive(Debug, Default)]
pub struct Lifecycle {
    started: Mutex<bool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_start` unless already started.
    pub fn start(&self, on_start: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut started = self
            .started
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        if *started {
            return Ok(());
        }
        on_start()?;
        *started = true;
        Ok(())
    }

    /// Run `on_stop` unless already stopped.
    pub fn stop(&self, on_stop: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut started = self
            .started
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        if !*started {
            return Ok(());
        }
        on_stop()?;
        *started = false;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.lock().map(|s| *s).unwrap_or(false)
    }
}

/// Append-only map of service name -> factory, filled at startup.
#[derive(Default)]
pub struct ServiceCatalog {
    factories: Mutex<HashMap<String, ServiceFactory>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A name can only be registered once.
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Value) -> Result<Arc<dyn Service>> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut factories = self
            .factories
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        if factories.contains_key(&name) {
            return Err(TripwireError::Service {
                service: name,
                message: "already registered".into(),
            });
        }
        debug!(service = %name, "Service class registered");
        factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn factory(&self, name: &str) -> Result<Option<ServiceFactory>> {
        let factories = self
            .factories
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        Ok(factories.get(name).cloned())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .lock()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Lazily started, shared service instances keyed by name.
pub struct ServiceRegistry {
    catalog: Arc<ServiceCatalog>,
    live: Mutex<HashMap<String, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    pub fn new(catalog: Arc<ServiceCatalog>) -> Self {
        Self {
            catalog,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    /// Return the live instance registered under `name`, constructing and
    /// starting one from the catalog if there is none. A stopped instance is
    /// evicted and replaced.
    pub fn lookup(&self, name: &str, args: &Value) -> Result<Arc<dyn Service>> {
        let mut live = self
            .live
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;

        if let Some(service) = live.get(name) {
            if service.is_started() {
                return Ok(Arc::clone(service));
            }
            debug!(service = %name, "Evicting stopped service");
            live.remove(name);
        }

        let factory = self
            .catalog
            .factory(name)?
            .ok_or_else(|| TripwireError::NotRegistered(name.to_string()))?;

        let service = factory(args)?;
        service.start()?;
        info!(service = %name, "Service started");
        live.insert(name.to_string(), Arc::clone(&service));
        Ok(service)
    }

    /// [`lookup`](Self::lookup) downcast to the concrete service type.
    pub fn lookup_as<T: Service>(&self, name: &str, args: &Value) -> Result<Arc<T>> {
        self.lookup(name, args)?
            .as_any()
            .downcast::<T>()
            .map_err(|_| TripwireError::Service {
                service: name.to_string(),
                message: format!("not a {}", std::any::type_name::<T>()),
            })
    }

    /// Stop and evict `name`. No-op when absent. The registry stays locked
    /// until the instance has stopped, so a concurrent lookup never builds a
    /// replacement alongside it.
    pub fn stop(&self, name: &str) -> Result<()> {
        let mut live = self
            .live
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;
        if let Some(service) = live.remove(name) {
            service.stop()?;
            info!(service = %name, "Service stopped");
        }
        Ok(())
    }

    /// Stop and evict every live instance, under the registry lock. Keeps
    /// going past individual failures and reports the first one.
    pub fn stop_all(&self) -> Result<()> {
        let mut live = self
            .live
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))?;

        let mut first_error = None;
        for (name, service) in live.drain() {
            match service.stop() {
                Ok(()) => info!(service = %name, "Service stopped"),
                Err(e) => {
                    warn!(service = %name, error = %e, "Service failed to stop");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Names of the live instances.
    pub fn live(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .live
            .lock()
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
