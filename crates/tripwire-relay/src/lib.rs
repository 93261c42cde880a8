//! Inter-graph messaging.
//!
//! [`MessageRelay`] is a [`Service`] holding one FIFO queue per role. Graphs
//! running on separate threads hand payloads to each other with
//! [`MessageRelay::send`] and [`MessageRelay::block_for`].

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tripwire_core::error::{Result, TripwireError};
use tripwire_core::service::{Lifecycle, ServiceCatalog, ServiceRegistry};
use tripwire_core::traits::Service;

/// Registry key of the relay service.
pub const RELAY_SERVICE: &str = "relay";

#[derive(Default)]
struct RoleQueue {
    messages: VecDeque<Value>,
    notify: Arc<Notify>,
}

struct State {
    queues: HashMap<String, RoleQueue>,
    closed: CancellationToken,
}

/// Role-keyed FIFO queues with blocking consumers.
pub struct MessageRelay {
    lifecycle: Lifecycle,
    state: Mutex<State>,
}

impl MessageRelay {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            state: Mutex::new(State {
                queues: HashMap::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// The live relay from `services`, started on first use.
    pub fn from_registry(services: &ServiceRegistry) -> Result<Arc<MessageRelay>> {
        services.lookup_as::<MessageRelay>(RELAY_SERVICE, &Value::Null)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| TripwireError::Lock(e.to_string()))
    }

    /// Append `payload` to `role`'s queue and wake one waiter for that role.
    pub fn send(&self, role: &str, payload: Value) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed.is_cancelled() {
            return Err(TripwireError::RelayClosed);
        }
        let queue = state.queues.entry(role.to_string()).or_default();
        queue.messages.push_back(payload);
        queue.notify.notify_one();
        debug!(role, queued = queue.messages.len(), "Message queued");
        Ok(())
    }

    /// Pop the head of `role`'s queue, waiting for a message if it is empty.
    ///
    /// Returns `None` when the relay shuts down; that is a shutdown signal,
    /// not a delivered message.
    pub async fn block_for(&self, role: &str) -> Option<Value> {
        loop {
            let (notify, closed) = match self.try_pop(role) {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => self.waiter(role)?,
                Err(_) => return None,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A send may have landed between the first check and enable().
            match self.try_pop(role) {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => {}
                Err(_) => return None,
            }

            tokio::select! {
                biased;
                _ = closed.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// [`block_for`](Self::block_for) giving up after `timeout`.
    pub async fn block_for_timeout(&self, role: &str, timeout: Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.block_for(role))
            .await
            .ok()
            .flatten()
    }

    /// Blocking [`block_for`](Self::block_for) for plain threads. Must not be
    /// called from inside an async task.
    pub fn block_for_sync(&self, role: &str) -> Option<Value> {
        futures::executor::block_on(self.block_for(role))
    }

    fn try_pop(&self, role: &str) -> Result<Option<Value>> {
        let mut state = self.lock()?;
        if state.closed.is_cancelled() {
            return Err(TripwireError::RelayClosed);
        }
        let Some(queue) = state.queues.get_mut(role) else {
            return Ok(None);
        };
        let payload = queue.messages.pop_front();
        // Pass the wakeup on while messages remain, so a waiter whose
        // notification was absorbed by someone else still gets served.
        if payload.is_some() && !queue.messages.is_empty() {
            queue.notify.notify_one();
        }
        Ok(payload)
    }

    fn waiter(&self, role: &str) -> Option<(Arc<Notify>, CancellationToken)> {
        let mut state = self.lock().ok()?;
        let closed = state.closed.clone();
        let queue = state.queues.entry(role.to_string()).or_default();
        Some((Arc::clone(&queue.notify), closed))
    }

    /// Head of `role`'s queue without removing it.
    pub fn peek(&self, role: &str) -> Option<Value> {
        let state = self.lock().ok()?;
        state.queues.get(role)?.messages.front().cloned()
    }

    pub fn has_messages(&self, role: &str) -> bool {
        self.queue_length(role) > 0
    }

    pub fn queue_length(&self, role: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| s.queues.get(role).map(|q| q.messages.len()))
            .unwrap_or(0)
    }

    /// Drop every message queued for `role`, returning how many were removed.
    pub fn clear(&self, role: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|mut s| {
                s.queues
                    .get_mut(role)
                    .map(|q| q.messages.drain(..).count())
            })
            .unwrap_or(0)
    }

    /// Roles that have been sent to or waited on, sorted.
    pub fn list_roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self
            .lock()
            .map(|s| s.queues.keys().cloned().collect())
            .unwrap_or_default();
        roles.sort();
        roles
    }
}

impl Default for MessageRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for MessageRelay {
    fn name(&self) -> &str {
        RELAY_SERVICE
    }

    fn start(&self) -> Result<()> {
        self.lifecycle.start(|| {
            let mut state = self.lock()?;
            if state.closed.is_cancelled() {
                state.closed = CancellationToken::new();
            }
            Ok(())
        })
    }

    /// Clear every queue and release all waiters.
    fn stop(&self) -> Result<()> {
        self.lifecycle.stop(|| {
            let mut state = self.lock()?;
            let dropped: usize = state.queues.values().map(|q| q.messages.len()).sum();
            state.queues.clear();
            state.closed.cancel();
            info!(dropped, "Message relay stopped");
            Ok(())
        })
    }

    fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Add the relay to `catalog` under [`RELAY_SERVICE`].
pub fn register(catalog: &ServiceCatalog) -> Result<()> {
    catalog.register(RELAY_SERVICE, |_: &Value| -> Result<Arc<dyn Service>> {
        Ok(Arc::new(MessageRelay::new()))
    })
}
