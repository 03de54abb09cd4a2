//! Router assembly and server lifecycle.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use roadwatch_core::VideoOpener;
use roadwatch_settings::RoadwatchSettings;
use roadwatch_vision::FramePipeline;
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::coordinator::SessionCoordinator;
use crate::error::ServerError;
use crate::reaper::start_reaper_task;
use crate::shutdown::{shutdown_sweep, ShutdownCoordinator, SweepReport};
use crate::store::SessionStore;
use crate::upload::upload_handler;
use crate::websocket::ws_process_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub coordinator: Arc<SessionCoordinator>,
    pub upload_dir: Arc<PathBuf>,
    pub start_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_send_queue: usize,
    pub start_time: Instant,
}

/// The decoder and the shared per-frame pipeline.
pub struct ServerDeps {
    pub opener: Arc<dyn VideoOpener>,
    pub pipeline: Arc<FramePipeline>,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub tracked_sessions: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, max_upload_bytes: Option<usize>) -> Router {
    let body_limit = match max_upload_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };
    Router::new()
        .route("/upload", post(upload_handler).layer(body_limit))
        .route("/ws/process", get(ws_process_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        tracked_sessions: state.store.len(),
    })
}

/// Bind, spawn the HTTP server and the reaper, and return a handle.
pub async fn start(
    settings: &RoadwatchSettings,
    deps: ServerDeps,
) -> Result<ServerHandle, ServerError> {
    let upload_dir = settings.server.upload_dir.clone();
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|source| ServerError::UploadDir {
            path: upload_dir.display().to_string(),
            source,
        })?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let store = Arc::new(SessionStore::new());
    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&store),
        deps.opener,
        deps.pipeline,
        settings.session.pacing(),
        shutdown.token(),
    ));

    let state = AppState {
        store: Arc::clone(&store),
        coordinator,
        upload_dir: Arc::new(upload_dir.clone()),
        start_timeout: settings.session.start_timeout(),
        heartbeat_interval: settings.server.heartbeat_interval(),
        max_send_queue: settings.server.max_send_queue,
        start_time: Instant::now(),
    };
    let router = build_router(state, settings.server.max_upload_bytes);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::bind(addr.clone(), e))?;
    let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let reaper = settings.session.reaper_interval().map(|interval| {
        start_reaper_task(
            Arc::clone(&store),
            interval,
            settings.session.upload_ttl(),
            shutdown.token(),
        )
    });

    let server_token = shutdown.token();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_token.cancelled().await });
        if let Err(e) = serve.await {
            warn!(error = %e, "http server exited with error");
        }
    });

    info!(
        addr = %local_addr,
        upload_dir = %upload_dir.display(),
        pacing_ms = settings.session.pacing_ms,
        "roadwatch server started"
    );

    Ok(ServerHandle {
        addr: local_addr,
        store,
        shutdown,
        server,
        reaper,
        shutdown_timeout: settings.session.shutdown_timeout(),
    })
}

/// Handle returned by [`start`]. Keeps the background tasks reachable.
pub struct ServerHandle {
    addr: SocketAddr,
    store: Arc<SessionStore>,
    shutdown: Arc<ShutdownCoordinator>,
    server: JoinHandle<()>,
    reaper: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Stop accepting connections, sweep every session, and wait for the
    /// background tasks.
    pub async fn shutdown(self) -> SweepReport {
        info!("shutting down");
        self.shutdown.shutdown();

        let report = shutdown_sweep(&self.store, self.shutdown_timeout).await;

        let mut handles = vec![self.server];
        handles.extend(self.reaper);
        self.shutdown
            .graceful_shutdown(handles, Some(self.shutdown_timeout))
            .await;

        // Uploads that completed while the listener was draining.
        let late = shutdown_sweep(&self.store, self.shutdown_timeout).await;
        SweepReport {
            tasks_cancelled: report.tasks_cancelled + late.tasks_cancelled,
            files_removed: report.files_removed + late.files_removed,
            timed_out: report.timed_out || late.timed_out,
        }
    }
}
