use std::collections::HashSet;

use tracing::{debug, info, warn};

use tripwire_core::error::{Result, TripwireError};
use tripwire_engine::{build_chain, Environment, Graph, StepDocument};

use crate::backend::{GraphRecord, StepRecord, StorageBackend};

/// Stores whole graphs through a record-level [`StorageBackend`].
///
/// Each step record points at the step before it, and the graph record
/// points at the last step, so a chain is read back by walking from the tail.
pub struct GraphManager<B: StorageBackend> {
    backend: B,
    env: Environment,
}

impl<B: StorageBackend> GraphManager<B> {
    /// Wrap `backend`, bringing its schema up to date. Fetched graphs are
    /// built against `env`.
    pub fn new(backend: B, env: Environment) -> Result<Self> {
        let found = backend.upgrade_if_needed()?;
        debug!(schema_found = found, "Graph manager ready");
        Ok(Self { backend, env })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Write `graph` and every step of its chain. Storing the same graph again
    /// overwrites in place; steps dropped from the chain since the last store
    /// are removed.
    pub fn create_or_update(&self, graph: &Graph) -> Result<()> {
        let stale: Vec<String> = match self.backend.get_graph(graph.id())? {
            Some(previous) => self.walk(&previous, false)?.into_iter().map(|s| s.id).collect(),
            None => Vec::new(),
        };

        let mut previous_step_id: Option<String> = None;
        let mut current = HashSet::new();
        for node in graph.steps() {
            self.backend.put_step(&StepRecord {
                id: node.id.clone(),
                name: node.name.clone(),
                kind: node.kind().to_string(),
                previous_step_id: previous_step_id.take(),
                inputs: node.inputs().clone(),
            })?;
            current.insert(node.id.as_str());
            previous_step_id = Some(node.id.clone());
        }

        self.backend.put_graph(&GraphRecord {
            id: graph.id().to_string(),
            name: graph.name().to_string(),
            last_step_id: previous_step_id,
            constants: graph.constants().clone(),
            subgraphs: graph.subgraphs().clone(),
        })?;

        for id in stale.iter().filter(|id| !current.contains(id.as_str())) {
            self.backend.remove_step(id)?;
        }

        info!(graph_id = %graph.id(), graph = %graph.name(), steps = current.len(), "Graph stored");
        Ok(())
    }

    /// Rebuild a stored graph. Step kinds are resolved only through the step
    /// catalog; a kind it does not know is a security error.
    pub fn fetch_by_id(&self, id: &str) -> Result<Option<Graph>> {
        let Some(record) = self.backend.get_graph(id)? else {
            return Ok(None);
        };
        let steps = self.walk(&record, true)?;

        if let Some(step) = steps.iter().find(|s| !self.env.catalog.contains(&s.kind)) {
            warn!(graph_id = %id, step = %step.name, kind = %step.kind, "Refusing unregistered step kind");
            return Err(TripwireError::Security(format!(
                "stored step '{}' of graph '{}' has unregistered kind '{}'",
                step.name, record.name, step.kind
            )));
        }

        let documents: Vec<StepDocument> = steps
            .into_iter()
            .map(|s| StepDocument {
                id: Some(s.id),
                name: s.name,
                class: s.kind,
                inputs: s.inputs,
            })
            .collect();
        let head = build_chain(&documents, &self.env.catalog)?;

        let graph = Graph::new(
            Some(record.id),
            record.name,
            head,
            record.constants,
            self.env.clone(),
        )?
        .with_subgraphs(record.subgraphs)?;
        debug!(graph_id = %id, steps = documents.len(), "Graph fetched");
        Ok(Some(graph))
    }

    /// Remove a graph and all of its steps. Returns false when there was
    /// nothing stored under `id`.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let Some(record) = self.backend.get_graph(id)? else {
            return Ok(false);
        };
        for step in self.walk(&record, false)? {
            self.backend.remove_step(&step.id)?;
        }
        self.backend.remove_graph(id)?;
        info!(graph_id = %id, "Graph deleted");
        Ok(true)
    }

    /// `(id, name)` of every stored graph.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .backend
            .list_graphs()?
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect())
    }

    /// Step records of `record` in chain order. With `strict`, a missing step
    /// or a loop is an error; otherwise the walk stops there.
    fn walk(&self, record: &GraphRecord, strict: bool) -> Result<Vec<StepRecord>> {
        let mut steps = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = record.last_step_id.clone();

        while let Some(step_id) = cursor {
            if !seen.insert(step_id.clone()) {
                if strict {
                    return Err(TripwireError::Storage(format!(
                        "graph '{}' has a cycle at step '{step_id}'",
                        record.id
                    )));
                }
                break;
            }
            let Some(step) = self.backend.get_step(&step_id)? else {
                if strict {
                    return Err(TripwireError::Storage(format!(
                        "graph '{}' references missing step '{step_id}'",
                        record.id
                    )));
                }
                break;
            };
            cursor = step.previous_step_id.clone();
            steps.push(step);
        }

        steps.reverse();
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::sqlite::SqliteBackend;
    use serde_json::json;
    use std::collections::HashMap;
    use tripwire_engine::GraphDocument;
    use tripwire_test_utils::{empty_services, test_catalog, Recorder};

    const DOC: &str = r#"{
        "Id": "g-1",
        "Name": "pipeline",
        "Constants": {"limit": 3, "label": "x"},
        "Graph": [
            {"Id": "s-1", "Name": "source", "Class": "Emit", "Inputs": {"value": "{{graph.label}}"}},
            {"Id": "s-2", "Name": "gate", "Class": "Gate", "Inputs": {"pass": true}},
            {"Id": "s-3", "Name": "sink", "Class": "Record", "Inputs": {"value": {"nested": [1, 2]}}}
        ],
        "Subgraphs": {
            "alt": [{"Name": "only", "Class": "Emit", "Inputs": {"value": 1}}]
        }
    }"#;

    fn env() -> Environment {
        Environment::new(test_catalog(&Recorder::new()), empty_services())
    }

    fn sample() -> Graph {
        Graph::from_document(GraphDocument::from_json(DOC).unwrap(), env()).unwrap()
    }

    fn memory_manager() -> Box<dyn ManagerUnderTest> {
        Box::new(GraphManager::new(MemoryBackend::new(), env()).unwrap())
    }

    fn sqlite_manager() -> Box<dyn ManagerUnderTest> {
        Box::new(GraphManager::new(SqliteBackend::in_memory().unwrap(), env()).unwrap())
    }

    type MakeManager = fn() -> Box<dyn ManagerUnderTest>;

    fn managers() -> Vec<(&'static str, MakeManager)> {
        vec![
            ("memory", memory_manager as MakeManager),
            ("sqlite", sqlite_manager as MakeManager),
        ]
    }

    /// Object-safe view so each test runs against both backends.
    trait ManagerUnderTest {
        fn store(&self, graph: &Graph) -> Result<()>;
        fn fetch(&self, id: &str) -> Result<Option<Graph>>;
        fn delete(&self, id: &str) -> Result<bool>;
        fn list(&self) -> Result<Vec<(String, String)>>;
        fn step(&self, id: &str) -> Option<StepRecord>;
        fn put_graph(&self, record: &GraphRecord);
        fn put_step(&self, record: &StepRecord);
    }

    impl<B: StorageBackend> ManagerUnderTest for GraphManager<B> {
        fn store(&self, graph: &Graph) -> Result<()> {
            self.create_or_update(graph)
        }
        fn fetch(&self, id: &str) -> Result<Option<Graph>> {
            self.fetch_by_id(id)
        }
        fn delete(&self, id: &str) -> Result<bool> {
            self.delete_by_id(id)
        }
        fn list(&self) -> Result<Vec<(String, String)>> {
            GraphManager::list(self)
        }
        fn step(&self, id: &str) -> Option<StepRecord> {
            self.backend().get_step(id).unwrap()
        }
        fn put_graph(&self, record: &GraphRecord) {
            self.backend().put_graph(record).unwrap()
        }
        fn put_step(&self, record: &StepRecord) {
            self.backend().put_step(record).unwrap()
        }
    }

    fn step_record(id: &str, kind: &str, previous: Option<&str>) -> StepRecord {
        StepRecord {
            id: id.into(),
            name: format!("step-{id}"),
            kind: kind.into(),
            previous_step_id: previous.map(String::from),
            inputs: HashMap::from([("value".to_string(), json!(1))]),
        }
    }

    fn graph_record(last: Option<&str>) -> GraphRecord {
        GraphRecord {
            id: "raw".into(),
            name: "raw".into(),
            last_step_id: last.map(String::from),
            constants: HashMap::new(),
            subgraphs: HashMap::new(),
        }
    }

    #[test]
    fn test_round_trip() {
        for (backend, make) in managers() {
            let manager = make();
            let original = sample();
            manager.store(&original).unwrap();

            let fetched = manager.fetch("g-1").unwrap().expect(backend);
            assert_eq!(fetched.name(), "pipeline");
            assert_eq!(fetched.constants(), original.constants());
            assert_eq!(fetched.subgraphs(), original.subgraphs());

            let got: Vec<_> = fetched
                .steps()
                .map(|n| (n.id.clone(), n.name.clone(), n.kind(), n.inputs().clone()))
                .collect();
            let want: Vec<_> = original
                .steps()
                .map(|n| (n.id.clone(), n.name.clone(), n.kind(), n.inputs().clone()))
                .collect();
            assert_eq!(got, want, "{backend}");
        }
    }

    #[test]
    fn test_store_is_idempotent() {
        for (backend, make) in managers() {
            let manager = make();
            let graph = sample();
            manager.store(&graph).unwrap();
            manager.store(&graph).unwrap();

            assert_eq!(
                manager.list().unwrap(),
                vec![("g-1".to_string(), "pipeline".to_string())],
                "{backend}"
            );
            let fetched = manager.fetch("g-1").unwrap().unwrap();
            assert_eq!(fetched.steps().count(), 3, "{backend}");
        }
    }

    #[test]
    fn test_update_removes_dropped_steps() {
        for (backend, make) in managers() {
            let manager = make();
            manager.store(&sample()).unwrap();

            let mut doc = GraphDocument::from_json(DOC).unwrap();
            doc.graph.remove(1);
            let shorter = Graph::from_document(doc, env()).unwrap();
            manager.store(&shorter).unwrap();

            assert!(manager.step("s-2").is_none(), "{backend}");
            assert_eq!(
                manager.step("s-3").unwrap().previous_step_id.as_deref(),
                Some("s-1")
            );
            let names: Vec<String> = manager
                .fetch("g-1")
                .unwrap()
                .unwrap()
                .steps()
                .map(|n| n.name.clone())
                .collect();
            assert_eq!(names, vec!["source", "sink"], "{backend}");
        }
    }

    #[test]
    fn test_delete() {
        for (backend, make) in managers() {
            let manager = make();
            manager.store(&sample()).unwrap();

            assert!(manager.delete("g-1").unwrap(), "{backend}");
            assert!(manager.fetch("g-1").unwrap().is_none());
            assert!(manager.step("s-1").is_none());
            assert!(manager.step("s-3").is_none());
            assert!(manager.list().unwrap().is_empty());

            assert!(!manager.delete("g-1").unwrap());
            assert!(!manager.delete("never-stored").unwrap());
        }
    }

    #[test]
    fn test_fetch_missing() {
        for (_, make) in managers() {
            assert!(make().fetch("nope").unwrap().is_none());
        }
    }

    #[test]
    fn test_unregistered_kind_is_security_error() {
        for (backend, make) in managers() {
            let manager = make();
            manager.put_step(&step_record("a", "Emit", None));
            manager.put_step(&step_record("b", "subprocess.Popen", Some("a")));
            manager.put_graph(&graph_record(Some("b")));

            let err = manager.fetch("raw").err().expect(backend);
            assert!(matches!(err, TripwireError::Security(_)), "{backend}: {err}");
            assert!(err.to_string().contains("subprocess.Popen"));
        }
    }

    #[test]
    fn test_corrupt_links_are_storage_errors() {
        for (backend, make) in managers() {
            let manager = make();
            manager.put_step(&step_record("a", "Emit", Some("b")));
            manager.put_step(&step_record("b", "Emit", Some("a")));
            manager.put_graph(&graph_record(Some("b")));
            let err = manager.fetch("raw").err().expect(backend);
            assert!(err.to_string().contains("cycle"), "{backend}: {err}");

            manager.put_step(&step_record("c", "Emit", Some("gone")));
            manager.put_graph(&graph_record(Some("c")));
            let err = manager.fetch("raw").err().expect(backend);
            assert!(err.to_string().contains("missing step 'gone'"), "{backend}: {err}");

            // Deleting still cleans up what it can reach.
            assert!(manager.delete("raw").unwrap());
            assert!(manager.step("c").is_none());
        }
    }

    #[test]
    fn test_fetched_graph_runs() {
        let recorder = Recorder::new();
        let env = Environment::new(test_catalog(&recorder), empty_services());
        let manager = GraphManager::new(MemoryBackend::new(), env.clone()).unwrap();
        manager
            .create_or_update(&Graph::from_document(GraphDocument::from_json(DOC).unwrap(), env).unwrap())
            .unwrap();

        let graph = manager.fetch_by_id("g-1").unwrap().unwrap();
        let report = graph.execute().unwrap().join().unwrap();
        assert_eq!(report.variables["source.value"], json!("x"));
        assert_eq!(recorder.values(), vec![json!({"nested": [1, 2]})]);
    }
}
