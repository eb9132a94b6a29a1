/// Execution callback
///
/// The engine posts `{status, executionId, error?}` to the callback URL compiled into
/// every node. The deployment id in the path correlates it with the workflow.

use crate::api::AppState;
use crate::audit::ExecutionReport;
use crate::error::TesseraError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};

pub fn create_execution_routes() -> Router<AppState> {
    Router::new().route("/api/executions/{deployment_id}", post(record_execution))
}

/// POST /api/executions/{deployment_id}
async fn record_execution(
    State(state): State<AppState>,
    Path(deployment_id): Path<String>,
    Json(report): Json<ExecutionReport>,
) -> Result<Json<Value>, StatusCode> {
    match state.orchestrator.record_execution(&deployment_id, &report).await {
        Ok(event_id) => {
            tracing::debug!(
                "📬 Execution {} of {} recorded as {}",
                report.execution_id,
                deployment_id,
                event_id
            );
            Ok(Json(json!({ "success": true, "data": { "eventId": event_id } })))
        }
        Err(TesseraError::NotFound(what)) => {
            tracing::warn!("Execution callback for unknown {}", what);
            Err(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            tracing::error!("Failed to record execution for {}: {}", deployment_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
