//! HTTP ingress for control-plane lifecycle events.
//!
//! # Responsibilities
//! - Create the Axum router with the event routes
//! - Wire up middleware (tracing, timeout, request ID)
//! - Dispatch events onto the blocking pool, where the reconciliation
//!   lock may be held across driver calls
//!
//! # Design Decisions
//! - Handlers answer 200 with a plain-text body once the event has been
//!   processed; delivery of a state-changing event is acknowledged even
//!   when the driver could not apply it (redelivery is the recovery path)
//! - 500 is reserved for a panicked handler task

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::agent::DhcpAgent;
use crate::config::AgentConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::model::{NetworkPayload, PortPayload};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<DhcpAgent>,
}

/// HTTP server for the lifecycle-event API.
pub struct HttpServer {
    router: Router,
    shutdown: Arc<Shutdown>,
}

impl HttpServer {
    pub fn new(config: &AgentConfig, agent: Arc<DhcpAgent>, shutdown: Arc<Shutdown>) -> Self {
        let state = AppState { agent };
        let router = Self::build_router(config, state);
        Self { router, shutdown }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &AgentConfig, state: AppState) -> Router {
        Router::new()
            .route(
                "/v1/dhcp_network/",
                post(network_create).put(network_update),
            )
            .route("/v1/dhcp_network/{network_id}", delete(network_delete))
            .route("/v1/dhcp_subnet/", post(subnet_update).put(subnet_update))
            .route("/v1/dhcp_subnet/{subnet_id}", delete(subnet_delete))
            .route("/v1/dhcp_port/", post(port_update).put(port_update))
            .route("/v1/dhcp_port/{port_id}", delete(port_delete))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut rx = self.shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Run one event handler on the blocking pool. The handler may hold the
/// reconciliation lock across driver calls, which must not pin a runtime
/// worker thread.
async fn dispatch<F>(task: F) -> Response
where
    F: FnOnce() -> String + Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Event handler task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "event handler failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn network_create(
    State(state): State<AppState>,
    Json(payload): Json<NetworkPayload>,
) -> Response {
    metrics::record_event("network", "create");
    dispatch(move || state.agent.network_create_end(payload)).await
}

async fn network_update(
    State(state): State<AppState>,
    Json(payload): Json<NetworkPayload>,
) -> Response {
    metrics::record_event("network", "update");
    dispatch(move || state.agent.network_update_end(payload)).await
}

async fn network_delete(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
) -> Response {
    metrics::record_event("network", "delete");
    dispatch(move || state.agent.network_delete_end(&network_id)).await
}

async fn subnet_update(
    State(state): State<AppState>,
    Json(payload): Json<NetworkPayload>,
) -> Response {
    metrics::record_event("subnet", "update");
    dispatch(move || state.agent.subnet_update_end(payload)).await
}

async fn subnet_delete(State(state): State<AppState>, Path(subnet_id): Path<String>) -> Response {
    metrics::record_event("subnet", "delete");
    dispatch(move || state.agent.subnet_delete_end(&subnet_id)).await
}

async fn port_update(State(state): State<AppState>, Json(payload): Json<PortPayload>) -> Response {
    metrics::record_event("port", "update");
    dispatch(move || state.agent.port_update_end(payload.port)).await
}

async fn port_delete(State(state): State<AppState>, Path(port_id): Path<String>) -> Response {
    metrics::record_event("port", "delete");
    dispatch(move || state.agent.port_delete_end(&port_id)).await
}
