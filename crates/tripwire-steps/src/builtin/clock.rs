use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use tripwire_core::context::StepContext;
use tripwire_core::error::Result;
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

fn valid_format(value: &Value) -> bool {
    value
        .as_str()
        .map_or(false, |fmt| StrftimeItems::new(fmt).all(|item| !matches!(item, Item::Error)))
}

static FIELDS: [FieldSpec; 1] = [FieldSpec::optional("format", FieldType::String)
    .with_validator(valid_format)
    .describe("strftime pattern for `now` (default RFC 3339)")];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "Clock",
    class: StepClass::DataFetch,
    description: "Publishes the current UTC time.",
    fields: &FIELDS,
    outputs: &["now", "epoch"],
};

pub struct Clock;

impl Step for Clock {
    fn descriptor(&self) -> &'static StepDescriptor {
        &DESCRIPTOR
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let now = Utc::now();
            let text = match fields.get_str("format") {
                Some(fmt) => now.format(fmt).to_string(),
                None => now.to_rfc3339(),
            };
            outputs.insert("now".into(), json!(text));
            outputs.insert("epoch".into(), json!(now.timestamp()));
            Ok(Flow::Continue)
        })
    }
}
