use axum::Router;
use dataflow_cluster::config::{NodeConfig, Role};
use dataflow_cluster::dataflow::executor::DataflowExecutor;
use dataflow_cluster::dataflow::handlers::{DataflowCoordinator, coordinator_router, submit_job, worker_router};
use dataflow_cluster::dataflow::registry::{JobRegistry, OperationRegistry};
use dataflow_cluster::dataflow::types::BundleManifest;
use dataflow_cluster::jobs::{register_jobs, register_operations};
use dataflow_cluster::membership::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, start_heartbeat};
use dataflow_cluster::membership::protocol::UNKNOWN_WORKER_ID;
use dataflow_cluster::membership::service::{DEFAULT_WORKER_EXPIRY, WorkerRegistry};
use dataflow_cluster::storage::client::KvsClient;
use dataflow_cluster::storage::table::{TableStore, load_or_create_worker_id};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("dataflow-node");

    let config = match NodeConfig::from_args(args.get(1..).unwrap_or_default()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", NodeConfig::usage(program));
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match config.role {
        Role::KvsCoordinator => run_kvs_coordinator(&config).await,
        Role::KvsWorker => run_kvs_worker(&config).await,
        Role::DataflowCoordinator => run_dataflow_coordinator(&config).await,
        Role::DataflowWorker => run_dataflow_worker(&config).await,
        Role::Submit => run_submit(&config).await,
    }
}

fn bind_addr(config: &NodeConfig) -> anyhow::Result<SocketAddr> {
    config.bind.ok_or_else(|| anyhow::anyhow!("--bind is required"))
}

fn coordinator(config: &NodeConfig) -> anyhow::Result<String> {
    config
        .coordinator
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--coordinator is required"))
}

async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("HTTP server listening on {}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

async fn run_kvs_coordinator(config: &NodeConfig) -> anyhow::Result<()> {
    let registry = WorkerRegistry::new(DEFAULT_WORKER_EXPIRY);
    registry.start_eviction();

    tracing::info!("Starting storage coordinator");
    serve(dataflow_cluster::membership::handlers::router(registry), bind_addr(config)?).await
}

async fn run_kvs_worker(config: &NodeConfig) -> anyhow::Result<()> {
    let addr = bind_addr(config)?;
    let id = load_or_create_worker_id(&config.storage_dir)?;
    tracing::info!("Storage worker {} using {}", id, config.storage_dir.display());

    let store = Arc::new(TableStore::new(&config.storage_dir));
    start_heartbeat(coordinator(config)?, id, addr.port(), DEFAULT_HEARTBEAT_INTERVAL);

    serve(dataflow_cluster::storage::handlers::router(store), addr).await
}

async fn run_dataflow_coordinator(config: &NodeConfig) -> anyhow::Result<()> {
    let kvs_addr = config
        .kvs
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--kvs is required"))?;

    let compute = WorkerRegistry::new(DEFAULT_WORKER_EXPIRY);
    compute.start_eviction();

    let jobs = JobRegistry::new();
    register_jobs(&jobs);

    let kvs = Arc::new(KvsClient::new(kvs_addr.clone()));
    let coordinator = DataflowCoordinator::new(kvs, compute, jobs);

    tracing::info!("Starting dataflow coordinator (storage at {})", kvs_addr);
    serve(coordinator_router(coordinator), bind_addr(config)?).await
}

async fn run_dataflow_worker(config: &NodeConfig) -> anyhow::Result<()> {
    let addr = bind_addr(config)?;

    let operations = OperationRegistry::new();
    register_operations(&operations);
    tracing::info!("Registered operations: {:?}", operations.list_operations());

    let executor = DataflowExecutor::new(operations);
    start_heartbeat(
        coordinator(config)?,
        UNKNOWN_WORKER_ID.to_string(),
        addr.port(),
        DEFAULT_HEARTBEAT_INTERVAL,
    );

    serve(worker_router(executor), addr).await
}

async fn run_submit(config: &NodeConfig) -> anyhow::Result<()> {
    let class = config
        .class
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--class is required"))?;

    let jobs = JobRegistry::new();
    register_jobs(&jobs);
    let Some(job) = jobs.get(&class) else {
        anyhow::bail!("Unknown job: {}", class);
    };

    let manifest = BundleManifest {
        job: class,
        operations: job.operations,
    };
    let output = submit_job(&reqwest::Client::new(), &coordinator(config)?, &manifest, &config.args).await?;
    print!("{}", output);
    Ok(())
}
