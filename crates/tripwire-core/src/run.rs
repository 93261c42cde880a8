use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TripwireError};

/// Lifecycle of one graph run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed(_)
        )
    }

    /// Lower-case state name without the failure message.
    pub fn label(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Cancelled => "cancelled",
            RunState::Failed(_) => "failed",
        }
    }
}

/// Shared, lock-protected run state written by the graph thread.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<RunState>>);

impl StateCell {
    pub fn new(state: RunState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> RunState {
        match self.0.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, state: RunState) {
        match self.0.lock() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub graph_id: String,
    pub graph_name: String,
    pub state: RunState,
    /// Traversals of the chain that were started.
    pub cycles: u64,
    pub steps_executed: u64,
    /// Variable store as it stood when the run ended.
    pub variables: HashMap<String, Value>,
}

/// Handle to a graph running on its own thread.
pub struct GraphHandle {
    graph_id: String,
    graph_name: String,
    cancel: CancellationToken,
    state: StateCell,
    thread: JoinHandle<Result<RunReport>>,
}

impl GraphHandle {
    pub fn new(
        graph_id: impl Into<String>,
        graph_name: impl Into<String>,
        cancel: CancellationToken,
        state: StateCell,
        thread: JoinHandle<Result<RunReport>>,
    ) -> Self {
        Self {
            graph_id: graph_id.into(),
            graph_name: graph_name.into(),
            cancel,
            state,
            thread,
        }
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// Request termination. Safe from any thread; does not wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the graph thread exits.
    pub fn join(self) -> Result<RunReport> {
        let name = self.graph_name;
        self.thread.join().map_err(|_| TripwireError::Execution {
            step: name,
            message: "graph thread panicked".into(),
        })?
    }
}

impl std::fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandle")
            .field("graph_id", &self.graph_id)
            .field("graph_name", &self.graph_name)
            .field("state", &self.state.get())
            .finish()
    }
}
