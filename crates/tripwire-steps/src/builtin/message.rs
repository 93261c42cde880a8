use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};
use tripwire_relay::MessageRelay;

use super::{non_empty, positive};

static AWAIT_FIELDS: [FieldSpec; 2] = [
    FieldSpec::required("role", FieldType::String)
        .with_validator(non_empty)
        .describe("Queue to consume from"),
    FieldSpec::optional("timeout", FieldType::Number)
        .with_validator(positive)
        .describe("Seconds to wait before halting (default: forever)"),
];

pub static AWAIT_DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "AwaitMessage",
    class: StepClass::Trigger,
    description: "Blocks until a message arrives for a role.",
    fields: &AWAIT_FIELDS,
    outputs: &["message"],
};

pub struct AwaitMessage;

impl Step for AwaitMessage {
    fn descriptor(&self) -> &'static StepDescriptor {
        &AWAIT_DESCRIPTOR
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let role = fields.get_str("role").unwrap_or_default();
            let relay = MessageRelay::from_registry(&ctx.services)?;

            let received = match fields.get_f64("timeout") {
                Some(secs) => {
                    let limit = Duration::try_from_secs_f64(secs)
                        .map_err(|e| TripwireError::execution(AWAIT_DESCRIPTOR.kind, e))?;
                    match tokio::time::timeout(limit, relay.block_for(role)).await {
                        Ok(received) => received,
                        Err(_) => {
                            debug!(graph_id = %ctx.graph_id, role, "No message before timeout");
                            return Ok(Flow::Halt);
                        }
                    }
                }
                None => relay.block_for(role).await,
            };

            // None means the relay shut down underneath us.
            let message = received.ok_or(TripwireError::RelayClosed)?;
            debug!(graph_id = %ctx.graph_id, role, "Message received");
            outputs.insert("message".into(), message);
            Ok(Flow::Continue)
        })
    }
}

static SEND_FIELDS: [FieldSpec; 2] = [
    FieldSpec::required("role", FieldType::String)
        .with_validator(non_empty)
        .describe("Queue to append to"),
    FieldSpec::required("message", FieldType::Any).describe("Payload"),
];

pub static SEND_DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "SendMessage",
    class: StepClass::Effect,
    description: "Queues a message for a role.",
    fields: &SEND_FIELDS,
    outputs: &["sent_at"],
};

pub struct SendMessage;

impl Step for SendMessage {
    fn descriptor(&self) -> &'static StepDescriptor {
        &SEND_DESCRIPTOR
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let role = fields.get_str("role").unwrap_or_default();
            let message = fields.get("message").cloned().unwrap_or_default();
            MessageRelay::from_registry(&ctx.services)?.send(role, message)?;
            debug!(graph_id = %ctx.graph_id, role, "Message sent");
            outputs.insert("sent_at".into(), json!(Utc::now().to_rfc3339()));
            Ok(Flow::Continue)
        })
    }
}
