use std::collections::HashMap;

use serde_json::Value;

/// A graph run's variable store: dotted keys to the last value seen.
///
/// Seeded once with `graph.<constant>` and `global.<key>`; after every step
/// its outputs land under `<step>.<output>`. Entries are never removed during
/// a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    values: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed constants under `graph.*` and non-null globals under `global.*`.
    pub fn seeded(constants: &HashMap<String, Value>, globals: &HashMap<String, Value>) -> Self {
        let mut values = HashMap::with_capacity(constants.len() + globals.len());
        for (key, value) in constants {
            values.insert(format!("graph.{key}"), value.clone());
        }
        for (key, value) in globals.iter().filter(|(_, v)| !v.is_null()) {
            values.insert(format!("global.{key}"), value.clone());
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Store a step's outputs as `<step>.<output>`, returning how many were written.
    pub fn record<'s, 'v, I>(&mut self, step: &str, outputs: I) -> usize
    where
        I: IntoIterator<Item = (&'s str, &'v Value)>,
    {
        let mut written = 0;
        for (output, value) in outputs {
            self.values.insert(format!("{step}.{output}"), value.clone());
            written += 1;
        }
        written
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}
