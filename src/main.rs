//! Airlock - main entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use airlock::api::{self, AppState};
use airlock::config::{Config, SandboxMode};
use airlock::crypto::MasterKey;
use airlock::dispatcher::Dispatcher;
use airlock::sandbox::{DockerSandbox, DockerSandboxConfig, EchoSandbox, SandboxBackend};
use airlock::services::{CredentialService, ExecutionService, ProfileService};
use airlock::store::Store;
use airlock::worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "airlock")]
#[command(about = "Credential airlock for autonomous agents")]
#[command(version)]
struct Args {
    /// Data directory (overrides AIRLOCK_DATA_DIR)
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Listen port (overrides AIRLOCK_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Use the echo sandbox instead of Docker workers
    #[arg(long)]
    mock_sandbox: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("airlock=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.mock_sandbox {
        config.worker.mode = SandboxMode::Mock;
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let master_key = Arc::new(MasterKey::load_or_create(&config.data_dir.join(".secret"))?);
    let store = Store::open(&config.data_dir.join("airlock.db"))?;
    tracing::info!(data_dir = %config.data_dir.display(), "Store ready");

    let credentials = CredentialService::new(store.clone(), Arc::clone(&master_key));
    let profiles = ProfileService::new(store.clone(), Arc::clone(&master_key));
    let history = ExecutionService::new(store.clone());

    // In-flight state does not survive restarts; fail whatever was left.
    history.fail_inflight("service restarted")?;

    let backends: Vec<Arc<dyn SandboxBackend>> = match config.worker.mode {
        SandboxMode::Docker => (0..config.worker.count)
            .map(|index| {
                Arc::new(DockerSandbox::new(DockerSandboxConfig {
                    image: config.worker.image.clone(),
                    container_name: format!("airlock-worker-{index}"),
                    host_port: config.worker.port_base + index as u16,
                    worker_port: config.worker.port_base + index as u16,
                    memory_limit_mb: config.worker.memory_limit_mb,
                    cpus: config.worker.cpus,
                    allowed_hosts: config.worker.allowed_hosts.clone(),
                })) as Arc<dyn SandboxBackend>
            })
            .collect(),
        SandboxMode::Mock => {
            tracing::warn!("Using the echo sandbox: scripts are NOT executed or isolated");
            (0..config.worker.count)
                .map(|_| Arc::new(EchoSandbox) as Arc<dyn SandboxBackend>)
                .collect()
        }
    };

    let pool = WorkerPool::new(backends);
    pool.start_all().await?;
    tracing::info!(
        workers = pool.slot_count(),
        mode = config.worker.mode.as_str(),
        "Worker pool ready"
    );

    let dispatcher = Dispatcher::new(pool.clone(), history.clone(), config.llm_wait_timeout);

    let state = AppState {
        credentials,
        profiles,
        history,
        dispatcher,
        store,
        default_exec_timeout: config.default_exec_timeout,
    };
    let router = api::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Airlock listening on {addr}");

    axum::serve(listener, router).await?;

    pool.shutdown().await;
    Ok(())
}
