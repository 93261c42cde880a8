//! Graph definition documents.
//!
//! A document names a graph, its constants and an ordered list of steps:
//!
//! ```json
//! {
//!   "Name": "watch",
//!   "Constants": { "target": "/tmp/flag" },
//!   "Graph": [
//!     { "Name": "trigger1", "Class": "FileModified", "Inputs": { "path": "{{graph.target}}" } },
//!     { "Name": "notify", "Class": "SendMessage", "Inputs": { "role": "ops", "message": "{{trigger1.time}}" } }
//!   ]
//! }
//! ```
//!
//! The same shape is accepted as TOML.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tripwire_core::catalog::StepCatalog;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::field::FieldValues;
use tripwire_core::step::StepNode;

/// Variable namespaces seeded by the engine. Steps may not use these names.
pub const RESERVED_NAMESPACES: [&str; 2] = ["graph", "global"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GraphDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub constants: HashMap<String, Value>,
    pub graph: Vec<StepDocument>,
    /// Alternate chains a running graph can fork into by name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub subgraphs: HashMap<String, Vec<StepDocument>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Registered step kind.
    pub class: String,
    #[serde(default)]
    pub inputs: FieldValues,
}

impl StepDocument {
    /// Describe an existing node, keeping its id and authored inputs.
    pub fn from_node(node: &StepNode) -> Self {
        Self {
            id: Some(node.id.clone()),
            name: node.name.clone(),
            class: node.kind().to_string(),
            inputs: node.inputs().clone(),
        }
    }
}

impl GraphDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TripwireError::GraphDefinition(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TripwireError::GraphDefinition(e.to_string()))
    }

    /// Read a document, choosing the format by extension (`.toml`, anything
    /// else is JSON).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TripwireError::GraphDefinition(format!("cannot read {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text),
            _ => Self::from_json(&text),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Reject step names that would collide with a seeded namespace or that
/// cannot form a `<step>.<output>` key.
pub fn check_step_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TripwireError::GraphDefinition(
            "step name must not be empty".into(),
        ));
    }
    let namespace = name.split('.').next().unwrap_or(name);
    if RESERVED_NAMESPACES.contains(&namespace) {
        return Err(TripwireError::GraphDefinition(format!(
            "step name '{name}' uses the reserved namespace '{namespace}'"
        )));
    }
    Ok(())
}

/// Step names key the variable table and ids key stored rows, so neither may
/// repeat within one chain.
pub fn check_unique_steps<'a, I>(steps: I) -> Result<()>
where
    I: IntoIterator<Item = (Option<&'a str>, &'a str)>,
{
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for (id, name) in steps {
        if let Some(id) = id {
            if !ids.insert(id) {
                return Err(TripwireError::GraphDefinition(format!(
                    "step id '{id}' is used twice"
                )));
            }
        }
        if !names.insert(name) {
            return Err(TripwireError::GraphDefinition(format!(
                "step name '{name}' is used twice"
            )));
        }
    }
    Ok(())
}

/// Instantiate and link `steps`, returning the head. Built back to front so
/// every node owns its successor.
pub fn build_chain(steps: &[StepDocument], catalog: &StepCatalog) -> Result<Option<Box<StepNode>>> {
    check_unique_steps(steps.iter().map(|s| (s.id.as_deref(), s.name.as_str())))?;
    let mut next: Option<Box<StepNode>> = None;

    for step in steps.iter().rev() {
        check_step_name(&step.name)?;
        let behavior = catalog.instantiate(&step.class)?.ok_or_else(|| {
            TripwireError::GraphDefinition(format!(
                "step '{}' has unknown class '{}'",
                step.name, step.class
            ))
        })?;

        let fields = behavior.descriptor().fields;
        if let Some(key) = step
            .inputs
            .keys()
            .find(|key| !fields.iter().any(|f| f.name == key.as_str()))
        {
            return Err(TripwireError::GraphDefinition(format!(
                "step '{}' ({}) has no field '{key}'",
                step.name, step.class
            )));
        }

        let node = StepNode::new(step.id.clone(), &step.name, behavior, step.inputs.clone())
            .with_next(next);
        next = Some(Box::new(node));
    }

    Ok(next)
}
