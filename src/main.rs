use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tripwire_core::catalog::StepCatalog;
use tripwire_core::config::AppConfig;
use tripwire_core::error::Result as RunResult;
use tripwire_core::run::{GraphHandle, RunReport, RunState};
use tripwire_core::service::{ServiceCatalog, ServiceRegistry};
use tripwire_engine::{Environment, Graph};
use tripwire_store::open_manager;

#[derive(Parser)]
#[command(name = "tripwire", version, about = "Event-driven workflow engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "TRIPWIRE_CONFIG", default_value = "tripwire.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load graph definitions and run them until they finish or Ctrl-C
    Run {
        /// Definition files (.json or .toml)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Persist a graph definition and print its id
    Store {
        file: PathBuf,
    },
    /// Run a stored graph
    Start {
        id: String,
    },
    /// Remove a stored graph
    Delete {
        id: String,
    },
    /// List stored graphs
    List,
    /// Show the registered step kinds and their fields
    Kinds,
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".tripwire").join("config.toml"));
    match home_config {
        Some(ref p) if p.exists() => Ok(AppConfig::load(p)?),
        _ => Ok(AppConfig::default()),
    }
}

/// Step kinds and services every command sees.
fn build_environment(config: &AppConfig) -> anyhow::Result<Environment> {
    let catalog = Arc::new(StepCatalog::new());
    tripwire_steps::register_builtins(&catalog)?;

    let service_catalog = Arc::new(ServiceCatalog::new());
    tripwire_relay::register(&service_catalog)?;
    let services = Arc::new(ServiceRegistry::new(service_catalog));

    Ok(Environment::from_config(config, catalog, services))
}

type Outcome = (String, RunResult<RunReport>);

/// Wait for every handle, cancelling all of them on Ctrl-C.
async fn supervise(handles: Vec<GraphHandle>) -> anyhow::Result<Vec<Outcome>> {
    let tokens: Vec<_> = handles.iter().map(GraphHandle::cancel_token).collect();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(graphs = tokens.len(), "Cancelling graphs...");
            for token in &tokens {
                token.cancel();
            }
        }
    });

    let results = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|h| (h.graph_name().to_string(), h.join()))
            .collect::<Vec<_>>()
    })
    .await
    .context("graph supervisor panicked")?;

    watcher.abort();
    Ok(results)
}

/// Print one line per run; error if any run failed.
fn summarize(results: Vec<Outcome>) -> anyhow::Result<()> {
    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(report) => {
                println!(
                    "{} [{}]: {} ({} cycles, {} steps)",
                    report.graph_name,
                    report.graph_id,
                    report.state.label(),
                    report.cycles,
                    report.steps_executed
                );
                if matches!(report.state, RunState::Failed(_)) {
                    failed += 1;
                }
            }
            Err(e) => {
                error!(graph = %name, error = %e, "Graph failed");
                println!("{name}: failed: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} graph(s) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    let env = build_environment(&config)?;
    let services = Arc::clone(&env.services);

    let outcome = match cli.command {
        Commands::Run { files } => {
            // Load everything before starting anything.
            let mut graphs = Vec::with_capacity(files.len());
            for file in &files {
                let graph = Graph::load(file, env.clone())
                    .with_context(|| format!("loading {}", file.display()))?;
                graphs.push(graph);
            }
            let mut handles = Vec::with_capacity(graphs.len());
            for graph in graphs {
                info!(graph = %graph.name(), id = %graph.id(), "Starting graph");
                handles.push(graph.execute()?);
            }
            let results = supervise(handles).await?;
            summarize(results)
        }
        Commands::Store { file } => {
            let graph = Graph::load(&file, env.clone())
                .with_context(|| format!("loading {}", file.display()))?;
            let manager = open_manager(&config.storage, env)?;
            manager.create_or_update(&graph)?;
            println!("{}", graph.id());
            Ok(())
        }
        Commands::Start { id } => {
            let manager = open_manager(&config.storage, env)?;
            let Some(graph) = manager.fetch_by_id(&id)? else {
                anyhow::bail!("no stored graph with id {id}");
            };
            let handle = graph.execute()?;
            let results = supervise(vec![handle]).await?;
            summarize(results)
        }
        Commands::Delete { id } => {
            let manager = open_manager(&config.storage, env)?;
            if manager.delete_by_id(&id)? {
                println!("Deleted {id}");
            } else {
                warn!(id = %id, "No stored graph to delete");
                println!("No stored graph with id {id}");
            }
            Ok(())
        }
        Commands::List => {
            let manager = open_manager(&config.storage, env)?;
            let graphs = manager.list()?;
            if graphs.is_empty() {
                println!("No stored graphs.");
            }
            for (id, name) in graphs {
                println!("{id}  {name}");
            }
            Ok(())
        }
        Commands::Kinds => {
            for descriptor in env.catalog.descriptors() {
                println!(
                    "{} ({}): {}",
                    descriptor.kind, descriptor.class, descriptor.description
                );
                for field in descriptor.fields {
                    let required = if field.required { "required" } else { "optional" };
                    println!("    {} <{}> {}  {}", field.name, field.ty, required, field.description);
                }
                if !descriptor.outputs.is_empty() {
                    println!("    -> {}", descriptor.outputs.join(", "));
                }
            }
            Ok(())
        }
    };

    if let Err(e) = services.stop_all() {
        warn!(error = %e, "Service shutdown incomplete");
    }
    outcome
}
