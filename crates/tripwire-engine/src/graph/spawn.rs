use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use tripwire_core::error::{Result, TripwireError};
use tripwire_core::run::GraphHandle;
use tripwire_core::traits::GraphSpawner;

use super::Graph;
use crate::definition::{build_chain, StepDocument};
use crate::environment::Environment;

/// Immutable recipe a running graph forks new copies from.
///
/// Step ids are dropped so every fork gets fresh ones and never aliases its
/// parent's steps in storage.
pub(crate) struct Blueprint {
    pub name: String,
    pub steps: Vec<StepDocument>,
    pub subgraphs: HashMap<String, Vec<StepDocument>>,
    pub env: Environment,
    /// Forks are cancelled along with the graph that spawned them.
    pub cancel: CancellationToken,
}

impl Blueprint {
    pub fn of(graph: &Graph) -> Self {
        let strip = |steps: &mut Vec<StepDocument>| steps.iter_mut().for_each(|s| s.id = None);

        let mut steps: Vec<StepDocument> = graph.steps().map(StepDocument::from_node).collect();
        strip(&mut steps);
        let mut subgraphs = graph.subgraphs.clone();
        subgraphs.values_mut().for_each(strip);

        Self {
            name: graph.name.clone(),
            steps,
            subgraphs,
            env: graph.env.clone(),
            cancel: graph.cancel.clone(),
        }
    }
}

impl GraphSpawner for Blueprint {
    fn fork(
        &self,
        constants: HashMap<String, Value>,
        subgraph: Option<&str>,
    ) -> Result<GraphHandle> {
        let (name, steps) = match subgraph {
            Some(sub) => {
                let steps = self.subgraphs.get(sub).ok_or_else(|| {
                    TripwireError::GraphDefinition(format!(
                        "graph '{}' has no subgraph '{sub}'",
                        self.name
                    ))
                })?;
                (format!("{}/{sub}", self.name), steps)
            }
            None => (self.name.clone(), &self.steps),
        };

        let head = build_chain(steps, &self.env.catalog)?;
        let child = Graph::assemble(
            Uuid::new_v4().to_string(),
            name,
            head,
            constants,
            self.subgraphs.clone(),
            self.env.clone(),
            self.cancel.child_token(),
        )?;
        info!(graph_id = %child.id(), graph = %child.name(), "Forking graph");
        child.execute()
    }
}
