use futures::future::BoxFuture;

use tripwire_core::context::StepContext;
use tripwire_core::error::Result;
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

static FIELDS: [FieldSpec; 1] = [FieldSpec::required("text", FieldType::String)];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "Template",
    class: StepClass::DataFetch,
    description: "Captures substituted text as a named variable.",
    fields: &FIELDS,
    outputs: &["text"],
};

/// Placeholders are already resolved by the time the step runs, so this only
/// republishes its input under `<step>.text`.
pub struct Template;

impl Step for Template {
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
            if let Some(text) = fields.get("text") {
                outputs.insert("text".into(), text.clone());
            }
            Ok(Flow::Continue)
        })
    }
}
