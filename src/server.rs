//! HTTP boundary for the inference service.
//!
//! The invocation endpoint always replies 200; failure is signaled by the
//! `error` field of the payload, never by a transport status, so callers
//! inspect the response shape.

use crate::codec::InvocationEvent;
use crate::config::ServerConfig;
use crate::metrics_store::PgMetricsStore;
use crate::service::{InferenceService, InvocationResponse};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    pub store: Arc<PgMetricsStore>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/invocations", post(invoke))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "inference-service"
    }))
}

/// Readiness check endpoint, verifying metrics-store connectivity.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Invocation endpoint.
#[instrument(skip(state, event), fields(invocation_id = %Uuid::new_v4()))]
async fn invoke(
    State(state): State<AppState>,
    Json(event): Json<InvocationEvent>,
) -> Json<InvocationResponse> {
    Json(state.service.handle(event).await)
}

/// Bind and serve the API until the process shuts down.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting inference API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
