//! Deterministic steps for exercising the engine and storage layers without
//! touching the filesystem or the clock.
//!
//! | Kind     | Class     | Fields                     | Outputs          |
//! |----------|-----------|----------------------------|------------------|
//! | `Emit`   | DataFetch | `value` (any, req)         | `value`          |
//! | `Record` | Effect    | `value` (any, req)         | `value`          |
//! | `Gate`   | Branch    | `pass` (bool, req)         | `passed`         |
//! | `Fail`   | Effect    | `message` (string)         |                  |
//! | `Wait`   | Trigger   | `millis` (integer)         | `waited`         |
//! | `Count`  | DataFetch |                            | `count`          |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use tripwire_core::catalog::StepCatalog;
use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::field::{FieldSpec, FieldType, FieldValues, Fields};
use tripwire_core::service::{ServiceCatalog, ServiceRegistry};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor, StepNode};

/// Values captured by `Record` steps, tagged with the graph name that ran them.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, graph: &str, value: Value) {
        self.entries
            .lock()
            .unwrap()
            .push((graph.to_string(), value));
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static VALUE_FIELDS: [FieldSpec; 1] = [FieldSpec::required("value", FieldType::Any)];

pub static EMIT: StepDescriptor = StepDescriptor {
    kind: "Emit",
    class: StepClass::DataFetch,
    description: "Publishes its value as an output.",
    fields: &VALUE_FIELDS,
    outputs: &["value"],
};

struct Emit;

impl Step for Emit {
    fn descriptor(&self) -> &'static StepDescriptor {
        &EMIT
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            if let Some(value) = fields.get("value") {
                outputs.insert("value".into(), value.clone());
            }
            Ok(Flow::Continue)
        })
    }
}

pub static RECORD: StepDescriptor = StepDescriptor {
    kind: "Record",
    class: StepClass::Effect,
    description: "Appends its value to the test recorder.",
    fields: &VALUE_FIELDS,
    outputs: &["value"],
};

struct Record {
    recorder: Recorder,
}

impl Step for Record {
    fn descriptor(&self) -> &'static StepDescriptor {
        &RECORD
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let value = fields.get("value").cloned().unwrap_or(Value::Null);
            self.recorder.push(&ctx.graph_name, value.clone());
            outputs.insert("value".into(), value);
            Ok(Flow::Continue)
        })
    }
}

static GATE_FIELDS: [FieldSpec; 1] = [FieldSpec::required("pass", FieldType::Boolean)];

pub static GATE: StepDescriptor = StepDescriptor {
    kind: "Gate",
    class: StepClass::Branch,
    description: "Continues when pass is true.",
    fields: &GATE_FIELDS,
    outputs: &["passed"],
};

struct Gate;

impl Step for Gate {
    fn descriptor(&self) -> &'static StepDescriptor {
        &GATE
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let pass = fields.get_bool("pass").unwrap_or(false);
            outputs.insert("passed".into(), json!(pass));
            Ok(if pass { Flow::Continue } else { Flow::Halt })
        })
    }
}

static FAIL_FIELDS: [FieldSpec; 1] = [FieldSpec::optional("message", FieldType::String)];

pub static FAIL: StepDescriptor = StepDescriptor {
    kind: "Fail",
    class: StepClass::Effect,
    description: "Always errors.",
    fields: &FAIL_FIELDS,
    outputs: &[],
};

struct Fail;

impl Step for Fail {
    fn descriptor(&self) -> &'static StepDescriptor {
        &FAIL
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        _outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let message = fields.get_str("message").unwrap_or("failed on purpose");
            Err(TripwireError::execution("Fail", message))
        })
    }
}

static WAIT_FIELDS: [FieldSpec; 1] = [FieldSpec::optional("millis", FieldType::Integer)];

pub static WAIT: StepDescriptor = StepDescriptor {
    kind: "Wait",
    class: StepClass::Trigger,
    description: "Fires after millis, or never when millis is absent.",
    fields: &WAIT_FIELDS,
    outputs: &["waited"],
};

struct Wait;

impl Step for Wait {
    fn descriptor(&self) -> &'static StepDescriptor {
        &WAIT
    }

    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            match fields.get_i64("millis") {
                Some(ms) => tokio::time::sleep(Duration::from_millis(ms.max(0) as u64)).await,
                None => futures::future::pending::<()>().await,
            }
            outputs.insert("waited".into(), json!(true));
            Ok(Flow::Continue)
        })
    }
}

pub static COUNT: StepDescriptor = StepDescriptor {
    kind: "Count",
    class: StepClass::DataFetch,
    description: "Counts its own executions.",
    fields: &[],
    outputs: &["count"],
};

struct Count {
    seen: u64,
}

impl Step for Count {
    fn descriptor(&self) -> &'static StepDescriptor {
        &COUNT
    }

    fn run<'a>(
        &'a mut self,
        _fields: &'a Fields,
        outputs: &'a mut Outputs,
        _ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            self.seen += 1;
            outputs.insert("count".into(), json!(self.seen));
            Ok(Flow::Continue)
        })
    }
}

/// A catalog holding every test step, with `Record` steps writing to `recorder`.
pub fn test_catalog(recorder: &Recorder) -> Arc<StepCatalog> {
    let catalog = StepCatalog::new();
    register_test_steps(&catalog, recorder);
    Arc::new(catalog)
}

/// Add the test steps to an existing catalog, e.g. one that already holds
/// the built-ins.
pub fn register_test_steps(catalog: &StepCatalog, recorder: &Recorder) {
    catalog.register(&EMIT, || Box::new(Emit)).unwrap();
    let recorder = recorder.clone();
    catalog
        .register(&RECORD, move || {
            Box::new(Record {
                recorder: recorder.clone(),
            })
        })
        .unwrap();
    catalog.register(&GATE, || Box::new(Gate)).unwrap();
    catalog.register(&FAIL, || Box::new(Fail)).unwrap();
    catalog.register(&WAIT, || Box::new(Wait)).unwrap();
    catalog
        .register(&COUNT, || Box::new(Count { seen: 0 }))
        .unwrap();
}

/// A registry with no services registered.
pub fn empty_services() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new(Arc::new(ServiceCatalog::new())))
}

/// Build a field map from a JSON object literal.
pub fn inputs(value: Value) -> FieldValues {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => HashMap::new(),
        other => panic!("inputs must be a JSON object, got {other}"),
    }
}

/// Link `(name, kind, inputs)` triples into a chain, head first.
pub fn chain(catalog: &StepCatalog, steps: &[(&str, &str, Value)]) -> Option<Box<StepNode>> {
    steps.iter().rev().fold(None, |next, (name, kind, values)| {
        let behavior = catalog
            .instantiate(kind)
            .unwrap()
            .unwrap_or_else(|| panic!("test step kind {kind} is not registered"));
        let node = StepNode::new(None, *name, behavior, inputs(values.clone())).with_next(next);
        Some(Box::new(node))
    })
}
