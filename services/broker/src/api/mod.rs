//! HTTP API handlers and routing.

pub mod error;
mod health;
mod instances;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints (no versioning)
        .merge(health::routes())
        // Broker API
        .nest("/v2", instances::routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        // Application state
        .with_state(state)
}
