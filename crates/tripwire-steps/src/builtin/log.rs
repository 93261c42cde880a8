use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use tripwire_core::context::StepContext;
use tripwire_core::error::Result;
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn known_level(value: &Value) -> bool {
    value
        .as_str()
        .map_or(false, |level| LEVELS.contains(&level.to_ascii_lowercase().as_str()))
}

static FIELDS: [FieldSpec; 2] = [
    FieldSpec::required("message", FieldType::String),
    FieldSpec::optional("level", FieldType::String)
        .with_validator(known_level)
        .describe("trace, debug, info (default), warn or error"),
];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "Log",
    class: StepClass::Effect,
    description: "Writes a message to the log.",
    fields: &FIELDS,
    outputs: &["message"],
};

pub struct Log;

impl Step for Log {
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
            let message = fields.get_str("message").unwrap_or_default();
            let level = fields.get_str("level").unwrap_or("info").to_ascii_lowercase();
            let graph = ctx.graph_name.as_str();

            match level.as_str() {
                "trace" => trace!(graph, "{message}"),
                "debug" => debug!(graph, "{message}"),
                "warn" => warn!(graph, "{message}"),
                "error" => error!(graph, "{message}"),
                _ => info!(graph, "{message}"),
            }

            outputs.insert("message".into(), json!(message));
            Ok(Flow::Continue)
        })
    }
}
