//! HTTP surface of the pairing-room service
//!
//! Queue and session endpoints for parties, plus health checks and the
//! Prometheus scrape endpoint, served with Axum.

use crate::error::{matchmaking_error, MatchmakingError};
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

/// Error returned by the handlers, rendered as `{"error": ...}`
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

/// Status code a matchmaking failure maps to
pub fn status_for(err: &anyhow::Error) -> StatusCode {
    match matchmaking_error(err) {
        Some(MatchmakingError::AlreadyWaiting { .. })
        | Some(MatchmakingError::DuplicateSession { .. })
        | Some(MatchmakingError::SessionEnded { .. }) => StatusCode::CONFLICT,
        Some(MatchmakingError::SessionNotFound { .. })
        | Some(MatchmakingError::NotSessionMember { .. }) => StatusCode::NOT_FOUND,
        Some(MatchmakingError::InvalidMembers { .. }) => StatusCode::BAD_REQUEST,
        Some(MatchmakingError::StoreUnavailable { .. })
        | Some(MatchmakingError::Connectivity { .. })
        | Some(MatchmakingError::TransactionContention { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request refused: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Create the Axum router with every endpoint
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/alive", get(alive_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/queue/{party_id}", post(join_handler).delete(leave_handler))
        .route("/queue/{party_id}/events", get(events_handler))
        .route("/sessions/{session_id}", get(session_handler))
        .route("/sessions/{session_id}/end", post(end_handler))
        .route(
            "/sessions/{session_id}/members/{party_id}/state",
            put(member_state_handler),
        )
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let service = &state.config().service;
    let addr: SocketAddr = format!("{}:{}", service.http_host, service.http_port)
        .parse()
        .context("Invalid HTTP server address")?;

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Root endpoint handler - shows service information
async fn root_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": state.config().service.name,
        "version": crate::VERSION,
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/queue/{party_id}",
            "/queue/{party_id}/events",
            "/sessions/{session_id}"
        ]
    }))
}

/// Lightweight health check endpoint handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");

    let status = HealthCheck::liveness_check(&state).await;
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(json!({
            "status": status,
            "service": state.config().service.name,
            "version": crate::VERSION
        })),
    )
}

/// Readiness check endpoint handler
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match HealthCheck::readiness_check(&state).await {
        HealthStatus::Healthy => (StatusCode::OK, "Ready"),
        HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready"),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
    }
}

/// Liveness check endpoint handler
async fn alive_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match HealthCheck::liveness_check(&state).await {
        HealthStatus::Healthy => (StatusCode::OK, "Alive"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let metric_families = state.metrics().registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                output,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Detailed service statistics endpoint handler
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = HealthCheck::check(&state).await;
    let code = match health.stats {
        Some(_) => StatusCode::OK,
        None => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        code,
        Json(json!({
            "service": {
                "name": health.service,
                "version": health.version,
                "status": health.status,
            },
            "stats": health.stats,
            "components": health.checks,
            "timestamp": health.timestamp
        })),
    )
}

async fn join_handler(
    State(state): State<Arc<AppState>>,
    Path(party_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.party(&party_id).join().await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn leave_handler(
    State(state): State<Arc<AppState>>,
    Path(party_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.party(&party_id).leave().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent events stream emitting one `matched` event with the session id
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Path(party_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError> {
    let mut party = state.party(&party_id);
    let (tx, rx) = mpsc::unbounded_channel();
    party.subscribe(move |session_id| {
        let _ = tx.send(session_id);
    })?;

    // The stream owns the handle so the subscription lives as long as the client
    let stream = UnboundedReceiverStream::new(rx).map(move |session_id| {
        debug!("Notifying {} of session {}", party.party_id(), session_id);
        Ok::<_, Infallible>(Event::default().event("matched").data(session_id))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.matchmaker().sessions().get(&session_id).await?;
    Ok(Json(session))
}

async fn end_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.end_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn member_state_handler(
    State(state): State<Arc<AppState>>,
    Path((session_id, party_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    state
        .party(&party_id)
        .update_state(&session_id, body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
