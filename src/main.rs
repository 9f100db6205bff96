use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use muster_core::events::BroadcastSink;
use muster_core::ids::ProjectId;
use muster_core::provider::ModelClient;
use muster_engine::sandbox::{ContainerRuntimeFactory, LocalRuntime, LocalRuntimeFactory, RuntimeFactory};
use muster_engine::{tools, CrewConfig, CrewOrchestrator};
use muster_llm::{ChatClient, ModelRouter};
use muster_registry::{CrewRegistry, KvStore, MemoryStore, SqliteStore};
use muster_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RuntimeKind {
    Local,
    Container,
}

#[derive(Parser, Debug)]
#[command(name = "muster", about = "Crew engine for model-driven security assessment")]
struct Args {
    /// The assessment task for the crew.
    #[arg(long)]
    task: String,

    /// Target in scope.
    #[arg(long, default_value = "")]
    target: String,

    /// Project identifier scoping worker state in the registry.
    #[arg(long, default_value = "default")]
    project: String,

    /// Model tier to route the run through.
    #[arg(long, default_value = "reasoning")]
    tier: String,

    /// Sandbox kind for workers.
    #[arg(long, value_enum, default_value_t = RuntimeKind::Local)]
    runtime: RuntimeKind,

    /// Path for the persistent registry store; omit for in-memory.
    #[arg(long)]
    registry_db: Option<PathBuf>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        json: args.json_logs,
        ..Default::default()
    });

    let store: Arc<dyn KvStore> = match &args.registry_db {
        Some(path) => match SqliteStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("muster: failed to open registry store: {e}");
                std::process::exit(1);
            }
        },
        None => Arc::new(MemoryStore::new()),
    };
    let registry = CrewRegistry::new(store);
    let project = ProjectId::from_raw(format!("proj_{}", args.project));

    let router = ModelRouter::default();
    let model = router.get_model(Some(&args.tier));
    let client: Arc<dyn ModelClient> = match build_client(model) {
        Ok(client) => client,
        Err(message) => {
            eprintln!("muster: {message}");
            std::process::exit(1);
        }
    };

    let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp"));
    let runtime_factory: Arc<dyn RuntimeFactory> = match args.runtime {
        RuntimeKind::Local => Arc::new(LocalRuntimeFactory::new(workdir.clone())),
        RuntimeKind::Container => Arc::new(ContainerRuntimeFactory::new(
            None,
            project.clone(),
            std::env::temp_dir().join("muster-loot").join(&args.project),
        )),
    };

    let sink = Arc::new(BroadcastSink::new(1024));
    let metrics = MetricsRecorder::new();
    let printer = spawn_event_printer(sink.clone(), metrics.clone());

    let mut crew = CrewOrchestrator::new(
        client.clone(),
        Arc::new(tools::worker_toolset()),
        Arc::new(LocalRuntime::new(workdir)),
        runtime_factory,
        registry,
        project,
        sink,
        CrewConfig::default(),
    )
    .with_target(&args.target);

    tracing::info!(model, tier = %args.tier, "crew starting");
    let result = crew.run(&args.task).await;

    match &result {
        Ok(_) => router.report_success(model),
        Err(_) => router.report_failure(model),
    }

    printer.abort();
    for (name, value) in metrics.snapshot().counters {
        tracing::info!(counter = %name, value, "run metric");
    }

    match result {
        Ok(report) => {
            println!("{report}");
        }
        Err(e) => {
            eprintln!("muster: run failed: {e}");
            std::process::exit(1);
        }
    }
}

fn build_client(model: &str) -> Result<Arc<dyn ModelClient>, String> {
    let base_url = std::env::var("MUSTER_API_BASE")
        .map_err(|_| "MUSTER_API_BASE is not set".to_string())?;
    let api_key = std::env::var("MUSTER_API_KEY")
        .map_err(|_| "MUSTER_API_KEY is not set".to_string())?;

    ChatClient::new(&base_url, api_key.into(), model)
        .map(|client| Arc::new(client) as Arc<dyn ModelClient>)
        .map_err(|e| e.to_string())
}

fn spawn_event_printer(
    sink: Arc<BroadcastSink>,
    metrics: MetricsRecorder,
) -> tokio::task::JoinHandle<()> {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            metrics.increment(event.event_type(), 1);
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "unserializable event"),
            }
        }
    })
}
