//! Workflow management endpoints.
//!
//! - GET /api/v1/workflows - List registered workflows
//! - POST /api/v1/workflows/{id}/run - Start a workflow manually
//! - POST /api/v1/workflows/events - Send a trigger event
//! - GET /api/v1/workflows/runs/{id} - Fetch a run record

use crate::{
    error::AppError,
    models::workflow::{
        RunWorkflowRequest, WorkflowEventRequest, WorkflowInfo, WorkflowRun,
        WorkflowsStartedResponse,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkflowInfo>>, AppError> {
    Ok(Json(state.scheduler.workflows().await?))
}

/// Start a workflow now.
///
/// # Endpoint
///
/// `POST /api/v1/workflows/{id}/run`
///
/// ```json
/// { "input": { "tenantId": "42" } }
/// ```
///
/// # Response
///
/// - **202 Accepted**: `{ "run_id", "workflow_id" }`
/// - **404**: Unknown workflow
/// - **409**: The workflow is already running
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<RunWorkflowRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let run_id = state.scheduler.trigger(&workflow_id, request.input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "workflow_id": workflow_id })),
    ))
}

/// Send a named trigger event, e.g. `backup/requested`.
///
/// Responds with the ids of the workflows that were started. Workflows
/// already running are skipped.
pub async fn send_workflow_event(
    State(state): State<AppState>,
    Json(request): Json<WorkflowEventRequest>,
) -> Result<Json<WorkflowsStartedResponse>, AppError> {
    if request.name.is_empty() {
        return Err(AppError::InvalidRequest("Event name is required".to_string()));
    }

    let started = state
        .scheduler
        .dispatch_event(&request.name, request.data)
        .await?;

    Ok(Json(WorkflowsStartedResponse { started }))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<WorkflowRun>, AppError> {
    let run = state.runs.get(run_id).await?.ok_or(AppError::RunNotFound)?;
    Ok(Json(run))
}
