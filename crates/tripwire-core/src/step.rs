use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::StepContext;
use crate::error::Result;
use crate::field::{FieldSpec, FieldValues, Fields};

/// The four polymorphic step classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepClass {
    /// Blocks until an external condition fires.
    Trigger,
    /// Performs a side effect.
    Effect,
    /// Decides whether the chain continues.
    Branch,
    /// Produces a value without side effects.
    DataFetch,
}

impl std::fmt::Display for StepClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepClass::Trigger => "trigger",
            StepClass::Effect => "effect",
            StepClass::Branch => "branch",
            StepClass::DataFetch => "data_fetch",
        };
        f.write_str(name)
    }
}

/// Static description of a concrete step type, built once and shared by
/// every instance.
#[derive(Debug)]
pub struct StepDescriptor {
    /// Registered kind name, e.g. `"FileModified"`.
    pub kind: &'static str,
    pub class: StepClass,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
    pub outputs: &'static [&'static str],
}

/// Output name -> value written by a step during one execution.
pub type Outputs = HashMap<String, Value>;

/// What the chain does after a step returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Move on to the next step.
    Continue,
    /// Stop this traversal. Not an error.
    Halt,
}

/// Behavior of a concrete step type.
pub trait Step: Send + 'static {
    fn descriptor(&self) -> &'static StepDescriptor;

    /// Perform the step with already-applied `fields`, writing declared
    /// outputs into `outputs`.
    fn run<'a>(
        &'a mut self,
        fields: &'a Fields,
        outputs: &'a mut Outputs,
        ctx: &'a StepContext,
    ) -> BoxFuture<'a, Result<Flow>>;
}

/// One node of a graph's singly linked step chain.
pub struct StepNode {
    pub id: String,
    pub name: String,
    inputs: FieldValues,
    fields: Fields,
    outputs: Outputs,
    behavior: Box<dyn Step>,
    pub next: Option<Box<StepNode>>,
}

impl StepNode {
    /// Wrap a step behavior. A missing id is generated.
    pub fn new(
        id: Option<String>,
        name: impl Into<String>,
        behavior: Box<dyn Step>,
        inputs: FieldValues,
    ) -> Self {
        let fields = Fields::new(behavior.descriptor().fields);
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: name.into(),
            inputs,
            fields,
            outputs: Outputs::new(),
            behavior,
            next: None,
        }
    }

    /// Set the successor, returning self for chained construction.
    pub fn with_next(mut self, next: Option<Box<StepNode>>) -> Self {
        self.next = next;
        self
    }

    pub fn descriptor(&self) -> &'static StepDescriptor {
        self.behavior.descriptor()
    }

    pub fn kind(&self) -> &'static str {
        self.descriptor().kind
    }

    pub fn class(&self) -> StepClass {
        self.descriptor().class
    }

    /// Input values as authored, placeholders intact.
    pub fn inputs(&self) -> &FieldValues {
        &self.inputs
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).filter(|v| !v.is_null())
    }

    /// Declared outputs with a non-null value from the last execution.
    pub fn produced_outputs(&self) -> impl Iterator<Item = (&'static str, &Value)> + '_ {
        self.descriptor()
            .outputs
            .iter()
            .filter_map(move |name| self.output(name).map(|v| (*name, v)))
    }

    /// Apply `inputs` to the declared fields and run the behavior.
    pub async fn execute(&mut self, inputs: &FieldValues, ctx: &StepContext) -> Result<Flow> {
        self.fields.apply_all(inputs)?;
        self.outputs.clear();
        self.behavior
            .run(&self.fields, &mut self.outputs, ctx)
            .await
    }

    /// Walk this node and every successor in chain order.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter { cursor: Some(self) }
    }
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("inputs", &self.inputs)
            .field("next", &self.next.as_ref().map(|n| n.id.as_str()))
            .finish()
    }
}

// Unlink iteratively so long chains don't recurse on drop.
impl Drop for StepNode {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

pub struct ChainIter<'a> {
    cursor: Option<&'a StepNode>,
}

impl<'a> ChainIter<'a> {
    /// Iterate from `head`, yielding nothing for an empty chain.
    pub fn new(head: Option<&'a StepNode>) -> Self {
        Self { cursor: head }
    }
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a StepNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = node.next.as_deref();
        Some(node)
    }
}
