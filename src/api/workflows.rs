/// Workflow authoring and lifecycle REST endpoints

use crate::api::{acting_user, AppState};
use crate::audit::AuditEvent;
use crate::deploy::{DeploymentReceipt, OperationResult, TestTriggerReceipt};
use crate::repository::WorkflowRecord;
use crate::workflow::WorkflowSpecification;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub specification: WorkflowSpecification,
}

/// Request body for a specification edit
#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub specification: WorkflowSpecification,
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateQuery {
    pub name: Option<String>,
}

type ApiResult<T> = Result<Json<OperationResult<T>>, StatusCode>;

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/templates/{template_id}", post(create_from_template))
        .route("/api/workflows/{id}/deploy", post(deploy_workflow))
        .route("/api/workflows/{id}/approve", post(approve_workflow))
        .route("/api/workflows/{id}/pause", post(pause_workflow))
        .route("/api/workflows/{id}/resume", post(resume_workflow))
        .route("/api/workflows/{id}/test", post(test_workflow))
        .route("/api/workflows/{id}/history", get(workflow_history))
}

/// POST /api/workflows
async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateWorkflowRequest>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(
        state
            .orchestrator
            .create_workflow(&actor, &payload.name, payload.specification)
            .await,
    ))
}

/// POST /api/workflows/templates/{template_id}?name=...
async fn create_from_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
    Query(query): Query<TemplateQuery>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(
        state
            .orchestrator
            .create_from_template(&actor, &template_id, query.name.as_deref())
            .await,
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<WorkflowRecord>> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.list_workflows(&actor).await))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.get_workflow(&id, &actor).await))
}

/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateWorkflowRequest>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(
        state
            .orchestrator
            .update_specification(&id, &actor, payload.specification)
            .await,
    ))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.delete(&id, &actor).await))
}

/// POST /api/workflows/{id}/deploy
async fn deploy_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<DeploymentReceipt> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.deploy(&id, &actor).await))
}

/// POST /api/workflows/{id}/approve
async fn approve_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.approve(&id, &actor).await))
}

/// POST /api/workflows/{id}/pause
async fn pause_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.pause(&id, &actor).await))
}

/// POST /api/workflows/{id}/resume
async fn resume_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<WorkflowRecord> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.resume(&id, &actor).await))
}

/// POST /api/workflows/{id}/test
async fn test_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<TestTriggerReceipt> {
    let actor = acting_user(&state, &headers).await?;
    Ok(Json(state.orchestrator.test_trigger(&id, &actor).await))
}

/// GET /api/workflows/{id}/history
async fn workflow_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Vec<AuditEvent>> {
    let actor = acting_user(&state, &headers).await?;
    let owned = state.orchestrator.get_workflow(&id, &actor).await;
    if !owned.success {
        return Ok(Json(OperationResult {
            success: false,
            data: None,
            error: owned.error,
        }));
    }

    match state.orchestrator.audit().workflow_history(&id).await {
        Ok(events) => Ok(Json(OperationResult::ok(events))),
        Err(e) => {
            tracing::error!("Failed to load history for {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
