//! HTTP surface and process lifecycle.
//!
//! Three routes: `/ws?doc=<id>` upgrades to the collaboration protocol,
//! `/health` answers liveness probes, `/metrics` reports counters and hub
//! stats as JSON. A maintenance task ticks the auto-save sweep, presence
//! staleness, and a periodic metrics log line. Shutdown stops accepting,
//! then flushes every dirty session within a bounded window.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::hub::{Hub, HubStats};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::storage::{DocumentStore, StoreConfig, StoreError};

/// Shared handles for every request handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<ServerConfig>,
    pub metrics: Arc<Metrics>,
}

/// Open the store (when configured) and wire up hub and metrics.
pub fn build_state(config: Arc<ServerConfig>) -> Result<AppState, StoreError> {
    let store = match &config.data_dir {
        Some(dir) => {
            let store_config = StoreConfig {
                path: dir.clone(),
                ..StoreConfig::default()
            };
            Some(Arc::new(DocumentStore::open(store_config)?))
        }
        None => {
            log::info!("running memory-only, documents are lost on restart");
            None
        }
    };
    let metrics = Arc::new(Metrics::default());
    let hub = Arc::new(Hub::new(store, metrics.clone()));
    Ok(AppState {
        hub,
        config,
        metrics,
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    doc: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(doc_id) = query.doc.filter(|d| !d.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing document id").into_response();
    };
    if state.metrics.active_connections() >= state.config.max_clients as i64 {
        log::warn!("connection rejected: at capacity ({})", state.config.max_clients);
        return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
    }

    // The transport cap sits above the protocol limit so an oversized
    // frame reaches the reader and is rejected with an error envelope
    // instead of a bare transport failure.
    ws.max_message_size(state.config.max_message_size * 2)
        .on_upgrade(move |socket| serve_connection(socket, doc_id, state))
        .into_response()
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    counters: MetricsSnapshot,
    hub: HubStats,
}

async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: state.metrics.snapshot(),
        hub: state.hub.stats().await,
    })
}

/// Periodic auto-save, presence sweep and metrics log line.
pub fn spawn_maintenance(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.autosave_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.hub.save_dirty(state.config.save_quiescence).await;
            state.hub.sweep_presence(state.config.presence_timeout).await;
            log::info!("metrics: {:?}", state.metrics.snapshot());
        }
    })
}

/// Run the server until a shutdown signal arrives, then flush.
pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let state = build_state(config.clone())?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!(
        "tandem-server listening on {} (env: {})",
        listener.local_addr()?,
        config.environment
    );

    let maintenance = spawn_maintenance(state.clone());
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    maintenance.abort();

    log::info!("shutting down, flushing dirty sessions");
    if tokio::time::timeout(config.shutdown_window, state.hub.shutdown_all())
        .await
        .is_err()
    {
        log::error!(
            "flush did not finish within the {:?} shutdown window",
            config.shutdown_window
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
