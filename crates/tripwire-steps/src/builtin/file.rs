use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info};

use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

use super::positive;

static FIELDS: [FieldSpec; 2] = [
    FieldSpec::required("path", FieldType::String).describe("File to watch"),
    FieldSpec::optional("frequency", FieldType::Number)
        .with_validator(positive)
        .describe("Seconds between polls (default 1)"),
];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "FileModified",
    class: StepClass::Trigger,
    description: "Fires when a file's modification time changes.",
    fields: &FIELDS,
    outputs: &["time", "path"],
};

/// Polls a file's mtime. The first poll only records a baseline; the step
/// fires on the first change after it. The last seen mtime survives across
/// repeat cycles, so one change fires once.
#[derive(Default)]
pub struct FileModified {
    last_seen: Option<SystemTime>,
    primed: bool,
}

async fn modified_at(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TripwireError::execution(
            DESCRIPTOR.kind,
            format!("cannot stat {}: {e}", path.display()),
        )),
    }
}

impl Step for FileModified {
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
            let path_str = fields.get_str("path").unwrap_or_default();
            let path = Path::new(path_str);
            let interval = Duration::try_from_secs_f64(fields.get_f64("frequency").unwrap_or(1.0))
                .map_err(|e| TripwireError::execution(DESCRIPTOR.kind, e))?;

            if !self.primed {
                self.last_seen = modified_at(path).await?;
                self.primed = true;
                debug!(graph_id = %ctx.graph_id, path = %path.display(), "Watching file");
            }

            loop {
                tokio::time::sleep(interval).await;
                let current = modified_at(path).await?;
                if let Some(mtime) = current.filter(|m| Some(*m) != self.last_seen) {
                    self.last_seen = Some(mtime);
                    let time = DateTime::<Utc>::from(mtime).to_rfc3339();
                    info!(graph_id = %ctx.graph_id, path = %path.display(), %time, "File modified");
                    outputs.insert("time".into(), json!(time));
                    outputs.insert("path".into(), json!(path_str));
                    return Ok(Flow::Continue);
                }
            }
        })
    }
}
