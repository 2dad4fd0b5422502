//! Health check endpoints.
//!
//! Used by load balancers and orchestration systems to determine if the
//! broker is healthy and ready to receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

fn health_body(status: &str) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "broker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Liveness probe; does not check dependencies.
async fn healthz() -> impl IntoResponse {
    Json(health_body("ok"))
}

/// Readiness probe; checks the registry connection when one exists.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.db() {
        Some(db) => match db.health_check().await {
            Ok(()) => (StatusCode::OK, Json(health_body("ok"))),
            Err(_) => (StatusCode::SERVICE_UNAVAILABLE, Json(health_body("degraded"))),
        },
        None => (StatusCode::OK, Json(health_body("ok"))),
    }
}
