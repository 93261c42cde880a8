use std::sync::Arc;

use serde_json::json;

use tripwire_core::catalog::StepCatalog;
use tripwire_core::config::{StorageConfig, StorageKind};
use tripwire_core::error::TripwireError;
use tripwire_core::run::RunState;
use tripwire_core::service::{ServiceCatalog, ServiceRegistry};
use tripwire_engine::{Environment, Graph, GraphDocument};
use tripwire_store::{open_manager, GraphManager, SqliteBackend};
use tripwire_test_utils::{register_test_steps, Recorder};

fn environment(recorder: &Recorder) -> Environment {
    let catalog = StepCatalog::new();
    tripwire_steps::register_builtins(&catalog).unwrap();
    register_test_steps(&catalog, recorder);
    let services = ServiceCatalog::new();
    tripwire_relay::register(&services).unwrap();
    Environment::new(
        Arc::new(catalog),
        Arc::new(ServiceRegistry::new(Arc::new(services))),
    )
}

fn definition() -> GraphDocument {
    GraphDocument::from_toml(
        r#"
Name = "nightly"

[Constants]
limit = "3"

[[Graph]]
Name = "src"
Class = "Emit"
Inputs = { value = "5" }

[[Graph]]
Name = "check"
Class = "Compare"
Inputs = { left = "{{src.value}}", op = "gt", right = "{{graph.limit}}" }

[[Graph]]
Name = "keep"
Class = "Record"
Inputs = { value = "{{src.value}} > {{graph.limit}}" }

[[Subgraphs.retry]]
Name = "again"
Class = "Log"
Inputs = { message = "retrying" }
"#,
    )
    .unwrap()
}

#[test]
fn test_definition_survives_store_and_fetch() {
    let recorder = Recorder::new();
    let env = environment(&recorder);
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graphs.db");

    let original = Graph::from_document(definition(), env.clone()).unwrap();
    let expected = original.to_document();
    let id = original.id().to_string();

    {
        let manager = GraphManager::new(SqliteBackend::open(&db).unwrap(), env.clone()).unwrap();
        manager.create_or_update(&original).unwrap();
        assert_eq!(manager.list().unwrap(), vec![(id.clone(), "nightly".to_string())]);
    }

    // A fresh connection sees the same graph.
    let manager = GraphManager::new(SqliteBackend::open(&db).unwrap(), env).unwrap();
    let fetched = manager.fetch_by_id(&id).unwrap().unwrap();
    assert_eq!(fetched.to_document(), expected);

    let kinds: Vec<&str> = fetched.steps().map(|s| s.kind()).collect();
    assert_eq!(kinds, vec!["Emit", "Compare", "Record"]);
    assert!(fetched.subgraphs().contains_key("retry"));

    let report = fetched.execute().unwrap().join().unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(recorder.values(), vec![json!("5 > 3")]);

    assert!(manager.delete_by_id(&id).unwrap());
    assert!(manager.fetch_by_id(&id).unwrap().is_none());
    assert!(manager.list().unwrap().is_empty());
}

#[test]
fn test_unregistered_kind_is_refused_on_fetch() {
    let recorder = Recorder::new();
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageKind::Sqlite,
        path: dir.path().join("graphs.db").display().to_string(),
    };

    let graph = Graph::from_document(definition(), environment(&recorder)).unwrap();
    let id = graph.id().to_string();
    open_manager(&config, environment(&recorder))
        .unwrap()
        .create_or_update(&graph)
        .unwrap();

    // Same database, but a catalog without the test steps.
    let catalog = StepCatalog::new();
    tripwire_steps::register_builtins(&catalog).unwrap();
    let services = Arc::new(ServiceRegistry::new(Arc::new(ServiceCatalog::new())));
    let narrow = Environment::new(Arc::new(catalog), services);

    let err = open_manager(&config, narrow).unwrap().fetch_by_id(&id).unwrap_err();
    assert!(matches!(err, TripwireError::Security(_)));
    assert!(err.to_string().contains("Emit"));
}
