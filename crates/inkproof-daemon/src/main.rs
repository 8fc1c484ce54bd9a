use anyhow::{Context, Result};
use clap::Parser;
use inkproof_artifacts::{ArtifactStore, FsArtifactStore};
use inkproof_config::AppConfig;
use inkproof_queue::{InMemoryJobQueue, JobQueue};
use inkproof_sandbox::{DockerSandboxRunner, SandboxRunner};
use inkproof_store::{JobStatusStore, TtlStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inkproof-daemon", version, about = "Inkproof compile-job and collaboration server")]
struct Args {
    /// Bind address, overrides INKPROOF_BIND / the config default.
    #[arg(long)]
    bind: Option<String>,

    /// Number of compile jobs the worker will run concurrently.
    #[arg(long, default_value_t = 2)]
    worker_concurrency: usize,

    /// Interval (seconds) between sweeps evicting expired status/log records.
    #[arg(long, default_value_t = 300)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inkproof=info")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    for warning in config.warnings() {
        warn!(%warning, "configuration warning");
    }
    let config = Arc::new(config);

    tokio::fs::create_dir_all(&config.workspace_root)
        .await
        .with_context(|| format!("create workspace root {}", config.workspace_root.display()))?;
    tokio::fs::create_dir_all(&config.artifacts_root)
        .await
        .with_context(|| format!("create artifacts root {}", config.artifacts_root.display()))?;

    let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(1024));
    let status_store = Arc::new(TtlStore::new());
    let _sweeper = status_store.spawn_sweeper(std::time::Duration::from_secs(args.sweep_interval_secs));
    let status_store: Arc<dyn JobStatusStore> = status_store;
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
        config.artifacts_root.clone(),
        format!("http://{}/artifacts", config.bind),
    ));
    let sandbox: Arc<dyn SandboxRunner> = Arc::new(DockerSandboxRunner);

    let inkproof_daemon::Daemon { router, dispatcher } = inkproof_daemon::build(
        config.clone(),
        queue,
        status_store,
        artifacts,
        sandbox,
        args.worker_concurrency,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(bind = %config.bind, "inkproof-daemon listening");

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining compile worker");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("serve")?;

    dispatcher.shutdown();
    let _ = dispatcher.wait.await;
    Ok(())
}
