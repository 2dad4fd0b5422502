//! Service instance endpoints.
//!
//! A thin layer over the lifecycle core: request bodies are translated
//! into core requests, outcomes into wire responses. No sharing or
//! provisioning logic lives here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mdsb_id::RequestId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::lifecycle::{CreateOutcome, CreateRequest, DeleteOutcome, LifecycleError};
use crate::model::ClaimStatus;
use crate::state::AppState;

use super::error::ApiError;

/// Create instance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/catalog", get(get_catalog))
        .route(
            "/service_instances/{instance_id}",
            get(get_instance)
                .put(create_instance)
                .delete(delete_instance),
        )
        .route(
            "/service_instances/{instance_id}/last_operation",
            get(get_last_operation),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Caller context identifying the requesting organization and space.
#[derive(Debug, Deserialize)]
pub struct RequestContext {
    pub organization_name: String,
    pub space_name: String,
    pub instance_name: String,
}

/// Request to create (or attach to) a service instance.
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub service_id: String,
    pub plan_id: String,
    pub context: RequestContext,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// State of the most recent operation on an instance.
#[derive(Debug, Serialize)]
pub struct LastOperation {
    pub state: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInstanceResponse {
    pub last_operation: LastOperation,
}

#[derive(Debug, Serialize)]
pub struct GetInstanceResponse {
    pub service_id: String,
    pub plan_id: String,
    pub last_operation: LastOperation,
}

#[derive(Debug, Serialize)]
pub struct DeleteInstanceResponse {
    pub result: String,
}

fn last_operation(state: ClaimStatus, description: String) -> LastOperation {
    LastOperation {
        state: state.to_string(),
        description,
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /v2/catalog
async fn get_catalog(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog().clone())
}

/// PUT /v2/service_instances/{instance_id}
async fn create_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(req): Json<CreateInstanceRequest>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    info!(
        request_id = %request_id,
        instance_id = %instance_id,
        service_id = %req.service_id,
        "create service instance"
    );

    let outcome = state
        .lifecycle()
        .create_instance(CreateRequest {
            instance_id,
            service_id: req.service_id,
            plan_id: req.plan_id,
            organization: req.context.organization_name,
            space: req.context.space_name,
            name: req.context.instance_name,
            parameters: req.parameters,
        })
        .await?;

    let response = match outcome {
        CreateOutcome::Accepted { description } => (
            StatusCode::ACCEPTED,
            Json(CreateInstanceResponse {
                last_operation: last_operation(ClaimStatus::InProgress, description),
            }),
        ),
        CreateOutcome::AlreadySucceeded { description } => (
            StatusCode::CREATED,
            Json(CreateInstanceResponse {
                last_operation: last_operation(ClaimStatus::Succeeded, description),
            }),
        ),
    };
    Ok(response.into_response())
}

/// GET /v2/service_instances/{instance_id}
async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<GetInstanceResponse>, ApiError> {
    let status = state.lifecycle().instance_status(&instance_id).await?;
    Ok(Json(GetInstanceResponse {
        service_id: status.service_id,
        plan_id: status.plan_id,
        last_operation: last_operation(status.state, status.description),
    }))
}

/// GET /v2/service_instances/{instance_id}/last_operation
///
/// An unknown instance reports a succeeded operation: after a completed
/// delete the claim row is gone, and callers polling the delete must see
/// success rather than an error.
async fn get_last_operation(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<LastOperation>, ApiError> {
    match state.lifecycle().instance_status(&instance_id).await {
        Ok(status) => Ok(Json(last_operation(status.state, status.description))),
        Err(LifecycleError::UnknownInstance(id)) => Ok(Json(last_operation(
            ClaimStatus::Succeeded,
            format!("service instance with id {id} not found"),
        ))),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /v2/service_instances/{instance_id}
async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = RequestId::new();
    info!(request_id = %request_id, instance_id = %instance_id, "delete service instance");

    let outcome = match state.lifecycle().delete_instance(&instance_id).await {
        Ok(outcome) => outcome,
        Err(LifecycleError::UnknownInstance(id)) => {
            return Err(ApiError::gone(
                "unknown_instance",
                format!("service instance with id {id} not found"),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let response = match outcome {
        DeleteOutcome::Accepted { description } => (
            StatusCode::ACCEPTED,
            Json(DeleteInstanceResponse { result: description }),
        ),
        DeleteOutcome::Dereferenced { description } | DeleteOutcome::AlreadyGone { description } => {
            (StatusCode::OK, Json(DeleteInstanceResponse { result: description }))
        }
    };
    Ok(response.into_response())
}
