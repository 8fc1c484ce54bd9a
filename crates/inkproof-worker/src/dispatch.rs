use crate::process::process_job;
use inkproof_artifacts::ArtifactStore;
use inkproof_config::AppConfig;
use inkproof_queue::JobQueue;
use inkproof_sandbox::SandboxRunner;
use inkproof_store::JobStatusStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// A running dispatch loop: pops descriptors off the queue and spawns
/// [`process_job`] for each one, up to `concurrency` jobs in flight at once.
pub struct Dispatcher {
    shutdown_tx: watch::Sender<bool>,
    /// Resolves once the dispatch loop has observed shutdown and every job
    /// it spawned has finished.
    pub wait: tokio::task::JoinHandle<()>,
}

impl Dispatcher {
    /// Start the dispatch loop on the current Tokio runtime.
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        status_store: Arc<dyn JobStatusStore>,
        artifacts: Arc<dyn ArtifactStore>,
        sandbox: Arc<dyn SandboxRunner>,
        config: Arc<AppConfig>,
        concurrency: usize,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wait = tokio::spawn(run_loop(
            queue,
            status_store,
            artifacts,
            sandbox,
            config,
            concurrency,
            shutdown_rx,
        ));
        Self { shutdown_tx, wait }
    }

    /// Signal the dispatch loop to stop picking up new jobs. In-flight jobs
    /// are allowed to finish; await `self.wait` to know when that's done.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_loop(
    queue: Arc<dyn JobQueue>,
    status_store: Arc<dyn JobStatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
    sandbox: Arc<dyn SandboxRunner>,
    config: Arc<AppConfig>,
    concurrency: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut in_flight = Vec::new();
    let job_deadline = config.sandbox_limits.timeout + Duration::from_secs(30);

    info!(concurrency, "compile worker dispatch loop starting");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let descriptor = tokio::select! {
            d = queue.blocking_pop(POLL_TIMEOUT) => d,
            _ = shutdown_rx.changed() => continue,
        };

        let Some(descriptor) = descriptor else {
            continue;
        };

        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let job_id = descriptor.job_id.clone();
        let status_store = status_store.clone();
        let artifacts = artifacts.clone();
        let sandbox = sandbox.clone();
        let config = config.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let outcome =
                tokio::time::timeout(job_deadline, process_job(descriptor, status_store, artifacts, sandbox, config))
                    .await;
            if outcome.is_err() {
                warn!(job_id = %job_id, deadline = ?job_deadline, "compile job exceeded its dispatch deadline");
            }
        });
        in_flight.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());
        in_flight.push(handle);
    }

    info!("compile worker dispatch loop shutting down, draining in-flight jobs");
    for handle in in_flight {
        let _ = handle.await;
    }
}
