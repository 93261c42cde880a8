//! Graph execution engine.
//!
//! A [`Graph`] owns a singly linked chain of steps. [`Graph::execute`] moves it
//! onto a dedicated thread that walks the chain: substitute `{{key}}`
//! placeholders from the variable store, run the step, record its outputs,
//! follow `next` until the chain ends or a branch halts. With
//! [`GraphOptions::repeat`] the walk restarts from the head.

pub mod options;
mod run;
mod spawn;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tripwire_core::context::StepContext;
use tripwire_core::error::{Result, TripwireError};
use tripwire_core::run::{GraphHandle, RunState, StateCell};
use tripwire_core::step::{ChainIter, StepNode};
use tripwire_core::traits::GraphSpawner;

use crate::definition::{build_chain, check_step_name, check_unique_steps, GraphDocument, StepDocument};
use crate::environment::Environment;
use crate::variables::Variables;

pub use options::GraphOptions;

use run::Run;
use spawn::Blueprint;

pub struct Graph {
    id: String,
    name: String,
    head: Option<Box<StepNode>>,
    constants: HashMap<String, Value>,
    subgraphs: HashMap<String, Vec<StepDocument>>,
    env: Environment,
    cancel: CancellationToken,
}

impl Graph {
    /// Wrap an already linked chain. A missing id is generated.
    pub fn new(
        id: Option<String>,
        name: impl Into<String>,
        head: Option<Box<StepNode>>,
        constants: HashMap<String, Value>,
        env: Environment,
    ) -> Result<Self> {
        Self::assemble(
            id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name.into(),
            head,
            constants,
            HashMap::new(),
            env,
            CancellationToken::new(),
        )
    }

    fn assemble(
        id: String,
        name: String,
        head: Option<Box<StepNode>>,
        constants: HashMap<String, Value>,
        subgraphs: HashMap<String, Vec<StepDocument>>,
        env: Environment,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let Some(first) = head.as_deref() else {
            return Err(TripwireError::GraphDefinition(format!(
                "graph '{name}' has no steps"
            )));
        };
        for node in first.iter() {
            check_step_name(&node.name)?;
        }
        check_unique_steps(first.iter().map(|n| (Some(n.id.as_str()), n.name.as_str())))?;

        Ok(Self {
            id,
            name,
            head,
            constants,
            subgraphs,
            env,
            cancel,
        })
    }

    /// Build a graph from a definition document, including its subgraphs.
    pub fn from_document(doc: GraphDocument, env: Environment) -> Result<Self> {
        let head = build_chain(&doc.graph, &env.catalog)?;
        Graph::new(doc.id, doc.name, head, doc.constants, env)?.with_subgraphs(doc.subgraphs)
    }

    /// [`GraphDocument::load`] then [`Graph::from_document`].
    pub fn load(path: &Path, env: Environment) -> Result<Self> {
        Self::from_document(GraphDocument::load(path)?, env)
    }

    /// Attach named alternate chains for [`Graph::fork`]. Each is built once
    /// here so definition errors surface before the graph runs.
    pub fn with_subgraphs(mut self, subgraphs: HashMap<String, Vec<StepDocument>>) -> Result<Self> {
        for (name, steps) in &subgraphs {
            if build_chain(steps, &self.env.catalog)?.is_none() {
                return Err(TripwireError::GraphDefinition(format!(
                    "subgraph '{name}' of '{}' has no steps",
                    self.name
                )));
            }
        }
        self.subgraphs = subgraphs;
        Ok(self)
    }

    pub fn with_options(mut self, options: GraphOptions) -> Self {
        self.env.options = options;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn head(&self) -> Option<&StepNode> {
        self.head.as_deref()
    }

    /// Steps in chain order.
    pub fn steps(&self) -> ChainIter<'_> {
        ChainIter::new(self.head.as_deref())
    }

    pub fn constants(&self) -> &HashMap<String, Value> {
        &self.constants
    }

    pub fn subgraphs(&self) -> &HashMap<String, Vec<StepDocument>> {
        &self.subgraphs
    }

    pub fn options(&self) -> GraphOptions {
        self.env.options
    }

    /// The store a run starts from: constants and globals, no step outputs.
    pub fn initial_variables(&self) -> Variables {
        Variables::seeded(&self.constants, &self.env.globals)
    }

    /// Token that cancels this graph and every fork it starts, usable before
    /// [`execute`](Self::execute).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            constants: self.constants.clone(),
            graph: self.steps().map(StepDocument::from_node).collect(),
            subgraphs: self.subgraphs.clone(),
        }
    }

    /// Start an independent copy of this graph with `constants` as its
    /// `graph.*` namespace, optionally entering a named subgraph instead.
    pub fn fork(
        &self,
        constants: HashMap<String, Value>,
        subgraph: Option<&str>,
    ) -> Result<GraphHandle> {
        Blueprint::of(self).fork(constants, subgraph)
    }

    /// Run on a new thread named `graph-<name>`. Returns immediately.
    pub fn execute(self) -> Result<GraphHandle> {
        let spawner: Arc<dyn GraphSpawner> = Arc::new(Blueprint::of(&self));
        let Graph {
            id,
            name,
            head,
            constants,
            env,
            cancel,
            ..
        } = self;

        let ctx = StepContext::new(&id, &name, Arc::clone(&env.services), cancel.clone())
            .with_spawner(spawner);
        let state = StateCell::new(RunState::Idle);
        let run = Run {
            head,
            variables: Variables::seeded(&constants, &env.globals),
            ctx,
            options: env.options,
            state: state.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("graph-{}", name.replace('\0', "")))
            .spawn(move || run.on_own_thread())?;

        Ok(GraphHandle::new(id, name, cancel, state, thread))
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps().map(|n| n.name.as_str()).collect::<Vec<_>>())
            .field("constants", &self.constants)
            .field("subgraphs", &self.subgraphs.keys().collect::<Vec<_>>())
            .field("options", &self.env.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::time::Duration;
    use tripwire_core::field::Fields;
    use tripwire_core::step::{Flow, Outputs, Step, StepClass, StepDescriptor};
    use tripwire_test_utils::{chain, empty_services, test_catalog, Recorder};

    fn env(recorder: &Recorder) -> Environment {
        Environment::new(test_catalog(recorder), empty_services())
    }

    fn graph(recorder: &Recorder, steps: &[(&str, &str, Value)]) -> Graph {
        let env = env(recorder);
        let head = chain(&env.catalog, steps);
        Graph::new(None, "test", head, HashMap::new(), env).unwrap()
    }

    #[test]
    fn test_outputs_flow_to_later_steps() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("source", "Emit", json!({"value": "payload"})),
                ("sink", "Record", json!({"value": "got {{source.value}}"})),
            ],
        );
        let report = g.execute().unwrap().join().unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(recorder.values(), vec![json!("got payload")]);
        assert_eq!(report.variables["source.value"], json!("payload"));
        assert_eq!(report.variables["sink.value"], json!("got payload"));
    }

    #[test]
    fn test_branch_halt_skips_rest_of_chain() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("gate", "Gate", json!({"pass": false})),
                ("after", "Record", json!({"value": "unreachable"})),
            ],
        );
        let report = g.execute().unwrap().join().unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.steps_executed, 1);
        assert_eq!(report.variables["gate.passed"], json!(false));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_missing_field_fails_run() {
        let recorder = Recorder::new();
        let g = graph(&recorder, &[("sink", "Record", json!({}))]);
        let handle = g.execute().unwrap();
        let err = handle_join_err(handle);
        assert!(err.to_string().contains("required field value missing or invalid"));
    }

    fn handle_join_err(handle: GraphHandle) -> TripwireError {
        while !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(handle.state(), RunState::Failed(_)));
        handle.join().unwrap_err()
    }

    #[test]
    fn test_step_error_fails_run() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("boom", "Fail", json!({"message": "disk full"})),
                ("after", "Record", json!({"value": 1})),
            ],
        );
        let err = handle_join_err(g.execute().unwrap());
        assert!(matches!(err, TripwireError::Execution { .. }));
        assert!(err.to_string().contains("disk full"));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_cancel_abandons_blocked_trigger() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("forever", "Wait", json!({})),
                ("after", "Record", json!({"value": 1})),
            ],
        );
        let handle = g.execute().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.state(), RunState::Running);
        assert!(!handle.is_finished());

        handle.cancel();
        let report = handle.join().unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.steps_executed, 0);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_cancel_before_start() {
        let recorder = Recorder::new();
        let g = graph(&recorder, &[("sink", "Record", json!({"value": 1}))]);
        g.cancel_token().cancel();
        let report = g.execute().unwrap().join().unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_repeat_until_max_cycles() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("counter", "Count", json!({})),
                ("sink", "Record", json!({"value": "{{counter.count}}"})),
            ],
        )
        .with_options(GraphOptions::repeating().with_max_cycles(3));
        let report = g.execute().unwrap().join().unwrap();

        assert_eq!(report.cycles, 3);
        assert_eq!(report.steps_executed, 6);
        assert_eq!(recorder.values(), vec![json!("1"), json!("2"), json!("3")]);
    }

    #[test]
    fn test_repeat_restarts_after_halt() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("counter", "Count", json!({})),
                ("gate", "Gate", json!({"pass": false})),
                ("sink", "Record", json!({"value": 1})),
            ],
        )
        .with_options(GraphOptions::repeating().with_max_cycles(2));
        let report = g.execute().unwrap().join().unwrap();

        assert_eq!(report.cycles, 2);
        assert_eq!(report.variables["counter.count"], json!(2));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_repeat_until_cancelled() {
        let recorder = Recorder::new();
        let g = graph(&recorder, &[("tick", "Wait", json!({"millis": 5}))])
            .with_options(GraphOptions::repeating().with_cycle_delay(Duration::from_millis(5)));
        let handle = g.execute().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.cancel();

        let report = handle.join().unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert!(report.cycles > 1);
    }

    #[test]
    fn test_constants_and_globals_seeded() {
        let recorder = Recorder::new();
        let env = env(&recorder).with_globals(HashMap::from([
            ("owner".to_string(), json!("ops")),
            ("missing".to_string(), Value::Null),
        ]));
        let head = chain(
            &env.catalog,
            &[(
                "sink",
                "Record",
                json!({"value": "{{global.owner}}:{{graph.target}}:{{global.missing}}"}),
            )],
        );
        let constants = HashMap::from([("target".to_string(), json!("/tmp/f"))]);
        let g = Graph::new(Some("g-1".into()), "seeded", head, constants, env).unwrap();
        assert_eq!(g.initial_variables().len(), 2);

        let report = g.execute().unwrap().join().unwrap();
        assert_eq!(report.graph_id, "g-1");
        assert_eq!(
            recorder.values(),
            vec![json!("ops:/tmp/f:{{global.missing}}")]
        );
    }

    #[test]
    fn test_reserved_and_empty_chains_rejected() {
        let recorder = Recorder::new();
        let env = env(&recorder);
        let head = chain(&env.catalog, &[("graph", "Emit", json!({"value": 1}))]);
        let err = Graph::new(None, "bad", head, HashMap::new(), env.clone()).unwrap_err();
        assert!(matches!(err, TripwireError::GraphDefinition(_)));

        let err = Graph::new(None, "empty", None, HashMap::new(), env).unwrap_err();
        assert!(err.to_string().contains("has no steps"));
    }

    #[test]
    fn test_linked_chain_with_repeated_name_rejected() {
        let recorder = Recorder::new();
        let env = env(&recorder);
        let head = chain(
            &env.catalog,
            &[("a", "Emit", json!({"value": 1})), ("a", "Emit", json!({"value": 2}))],
        );
        let err = Graph::new(None, "twice", head, HashMap::new(), env).unwrap_err();
        assert!(err.to_string().contains("step name 'a' is used twice"));
    }

    #[test]
    fn test_fork_gets_own_constants() {
        let recorder = Recorder::new();
        let env = env(&recorder);
        let head = chain(
            &env.catalog,
            &[("sink", "Record", json!({"value": "{{graph.who}}"}))],
        );
        let constants = HashMap::from([("who".to_string(), json!("parent"))]);
        let parent = Graph::new(None, "family", head, constants, env).unwrap();

        let child = parent
            .fork(HashMap::from([("who".to_string(), json!("child"))]), None)
            .unwrap();
        assert_ne!(child.graph_id(), parent.id());
        assert_eq!(child.graph_name(), "family");
        child.join().unwrap();

        parent.execute().unwrap().join().unwrap();
        assert_eq!(recorder.values(), vec![json!("child"), json!("parent")]);
    }

    #[test]
    fn test_fork_subgraph() {
        let recorder = Recorder::new();
        let doc = GraphDocument::from_json(
            r#"{
                "Name": "main",
                "Graph": [{"Name": "a", "Class": "Emit", "Inputs": {"value": 1}}],
                "Subgraphs": {
                    "alt": [{"Name": "b", "Class": "Record", "Inputs": {"value": "{{graph.n}}"}}]
                }
            }"#,
        )
        .unwrap();
        let g = Graph::from_document(doc, env(&recorder)).unwrap();

        let child = g
            .fork(HashMap::from([("n".to_string(), json!(7))]), Some("alt"))
            .unwrap();
        assert_eq!(child.graph_name(), "main/alt");
        child.join().unwrap();
        assert_eq!(recorder.entries(), vec![("main/alt".to_string(), json!("7"))]);

        let err = g.fork(HashMap::new(), Some("nope")).unwrap_err();
        assert!(err.to_string().contains("no subgraph 'nope'"));
    }

    #[test]
    fn test_bad_subgraph_rejected_at_load() {
        let recorder = Recorder::new();
        let doc = GraphDocument::from_json(
            r#"{
                "Name": "main",
                "Graph": [{"Name": "a", "Class": "Emit", "Inputs": {"value": 1}}],
                "Subgraphs": {"alt": [{"Name": "b", "Class": "Missing"}]}
            }"#,
        )
        .unwrap();
        let err = Graph::from_document(doc, env(&recorder)).unwrap_err();
        assert!(err.to_string().contains("unknown class 'Missing'"));
    }

    #[test]
    fn test_cancelling_parent_cancels_forks() {
        let recorder = Recorder::new();
        let env = env(&recorder);
        let head = chain(&env.catalog, &[("forever", "Wait", json!({}))]);
        let parent = Graph::new(None, "parent", head, HashMap::new(), env).unwrap();

        let independent = parent.fork(HashMap::new(), None).unwrap();
        let dependent = parent.fork(HashMap::new(), None).unwrap();
        let handle = parent.execute().unwrap();
        std::thread::sleep(Duration::from_millis(30));

        independent.cancel();
        assert_eq!(independent.join().unwrap().state, RunState::Cancelled);
        assert!(!handle.is_finished());
        assert!(!dependent.is_finished());

        handle.cancel();
        assert_eq!(handle.join().unwrap().state, RunState::Cancelled);
        assert_eq!(dependent.join().unwrap().state, RunState::Cancelled);
    }

    static THREAD_NAME: StepDescriptor = StepDescriptor {
        kind: "ThreadName",
        class: StepClass::DataFetch,
        description: "Reports the thread it ran on.",
        fields: &[],
        outputs: &["thread"],
    };

    struct ThreadName;

    impl Step for ThreadName {
        fn descriptor(&self) -> &'static StepDescriptor {
            &THREAD_NAME
        }

        fn run<'a>(
            &'a mut self,
            _fields: &'a Fields,
            outputs: &'a mut Outputs,
            _ctx: &'a StepContext,
        ) -> BoxFuture<'a, Result<Flow>> {
            Box::pin(async move {
                let name = std::thread::current().name().unwrap_or("").to_string();
                outputs.insert("thread".into(), json!(name));
                Ok(Flow::Continue)
            })
        }
    }

    #[test]
    fn test_runs_on_named_thread() {
        let recorder = Recorder::new();
        let env = env(&recorder);
        env.catalog
            .register(&THREAD_NAME, || Box::new(ThreadName))
            .unwrap();
        let head = chain(&env.catalog, &[("whoami", "ThreadName", json!({}))]);
        let g = Graph::new(None, "watcher", head, HashMap::new(), env).unwrap();

        let report = g.execute().unwrap().join().unwrap();
        assert_eq!(report.variables["whoami.thread"], json!("graph-watcher"));
    }

    #[test]
    fn test_to_document_round_trip() {
        let recorder = Recorder::new();
        let g = graph(
            &recorder,
            &[
                ("a", "Emit", json!({"value": "{{graph.x}}"})),
                ("b", "Record", json!({"value": 2})),
            ],
        );
        let doc = g.to_document();
        assert_eq!(doc.graph.len(), 2);
        assert_eq!(doc.graph[0].inputs["value"], json!("{{graph.x}}"));

        let rebuilt = Graph::from_document(doc, env(&recorder)).unwrap();
        assert_eq!(rebuilt.id(), g.id());
        let names: Vec<_> = rebuilt.steps().map(|n| n.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
