use std::borrow::Cow;
use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use tripwire_core::context::StepContext;
use tripwire_core::error::Result;
use tripwire_core::field::{FieldSpec, FieldType, Fields};
use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};

const OPERATORS: [&str; 7] = ["eq", "ne", "gt", "ge", "lt", "le", "contains"];

fn known_operator(value: &Value) -> bool {
    value.as_str().map_or(false, |op| OPERATORS.contains(&op))
}

static FIELDS: [FieldSpec; 3] = [
    FieldSpec::required("left", FieldType::Any),
    FieldSpec::required("op", FieldType::String)
        .with_validator(known_operator)
        .describe("eq, ne, gt, ge, lt, le or contains"),
    FieldSpec::required("right", FieldType::Any),
];

pub static DESCRIPTOR: StepDescriptor = StepDescriptor {
    kind: "Compare",
    class: StepClass::Branch,
    description: "Continues the chain only when the comparison holds.",
    fields: &FIELDS,
    outputs: &["result"],
};

pub struct Compare;

/// Numbers, and strings that parse as numbers, compare numerically.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items
            .iter()
            .any(|item| item == needle || as_text(item) == as_text(needle)),
        Value::Object(map) => map.contains_key(as_text(needle).as_ref()),
        other => as_text(other).contains(as_text(needle).as_ref()),
    }
}

/// Evaluate `left op right`. Unknown operators are false.
pub fn evaluate(left: &Value, op: &str, right: &Value) -> bool {
    if op == "contains" {
        return contains(left, right);
    }

    let ordering = match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(as_text(left).cmp(&as_text(right))),
    };

    // NaN compares false under every operator but ne.
    match (op, ordering) {
        ("eq", Some(o)) => o == Ordering::Equal,
        ("ne", o) => o != Some(Ordering::Equal),
        ("gt", Some(o)) => o == Ordering::Greater,
        ("ge", Some(o)) => o != Ordering::Less,
        ("lt", Some(o)) => o == Ordering::Less,
        ("le", Some(o)) => o != Ordering::Greater,
        _ => false,
    }
}

impl Step for Compare {
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
            let left = fields.get("left").cloned().unwrap_or_default();
            let right = fields.get("right").cloned().unwrap_or_default();
            let op = fields.get_str("op").unwrap_or_default();

            let result = evaluate(&left, op, &right);
            debug!(graph_id = %ctx.graph_id, %left, op, %right, result, "Compared");
            outputs.insert("result".into(), json!(result));

            Ok(if result { Flow::Continue } else { Flow::Halt })
        })
    }
}
