//! Wires the compile-job service and the realtime collaboration hub into a
//! single Axum application.

mod middleware;

use axum::Router;
use inkproof_artifacts::ArtifactStore;
use inkproof_config::AppConfig;
use inkproof_hub::{collab_router, CollabState, HubManager};
use inkproof_intake::{build_router as build_intake_router, AppState as IntakeState};
use inkproof_queue::JobQueue;
use inkproof_sandbox::SandboxRunner;
use inkproof_store::JobStatusStore;
use inkproof_worker::Dispatcher;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Everything the daemon binary assembles before it starts serving.
pub struct Daemon {
    pub router: Router,
    pub dispatcher: Dispatcher,
}

/// Assemble the compile intake routes, the collaboration hub routes, and the
/// compile-worker dispatch loop from a shared set of backing components.
pub fn build(
    config: Arc<AppConfig>,
    queue: Arc<dyn JobQueue>,
    status_store: Arc<dyn JobStatusStore>,
    artifacts: Arc<dyn ArtifactStore>,
    sandbox: Arc<dyn SandboxRunner>,
    worker_concurrency: usize,
) -> Daemon {
    let intake_state = Arc::new(IntakeState {
        queue: queue.clone(),
        status_store: status_store.clone(),
        artifacts: artifacts.clone(),
        config: config.clone(),
    });

    let collab_state = Arc::new(CollabState {
        hubs: HubManager::new(),
    });

    let dispatcher = Dispatcher::spawn(queue, status_store, artifacts, sandbox, config, worker_concurrency);

    let router = Router::new()
        .merge(build_intake_router(intake_state))
        .merge(collab_router(collab_state))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(CorsLayer::permissive());

    Daemon { router, dispatcher }
}
