use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;

use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::run::RunState;
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

use super::non_empty;

static FIELDS: [FieldSpec; 3] = [
    FieldSpec::optional("subgraph", FieldType::String)
        .with_validator(non_empty)
        .describe("Named alternate chain to run instead of the main one"),
    FieldSpec::optional("constants", FieldType::Map).describe("graph.* values for the child"),
    FieldSpec::optional("wait", FieldType::Boolean).describe("Block until the child finishes"),
];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "Fork",
    class: StepClass::Effect,
    description: "Starts an independent copy of the running graph.",
    fields: &FIELDS,
    outputs: &["graph_id", "state"],
};

/// Spawns a child run. The child gets its own thread and variable store and
/// is cancelled along with this graph.
pub struct Fork;

impl Step for Fork {
    fn descriptor(&self) -> &'static StepDescriptor {
        &DESCRIPTOR
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let constants: HashMap<String, Value> = fields
                .get("constants")
                .and_then(Value::as_object)
                .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            let subgraph = fields.get_str("subgraph");

            let handle = ctx.fork(constants, subgraph)?;
            info!(
                graph_id = %ctx.graph_id,
                child = %handle.graph_id(),
                subgraph = subgraph.unwrap_or("-"),
                "Forked graph"
            );
            outputs.insert("graph_id".into(), json!(handle.graph_id()));

            if fields.get_bool("wait").unwrap_or(false) {
                let state = tokio::task::spawn_blocking(move || handle.join())
                    .await
                    .map_err(|e| TripwireError::execution(DESCRIPTOR.kind, e))?
                    .map_or_else(|e| RunState::Failed(e.to_string()), |report| report.state);
                outputs.insert("state".into(), json!(state.label()));
            }

            Ok(Flow::Continue)
        })
    }
}
