use crate::error::TesseraError;
use serde::{Deserialize, Serialize};

/// Uniform `{success, data?, error?}` result of every orchestrator entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn from_result(result: Result<T, TesseraError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReceipt {
    pub workflow_id: String,
    pub engine_workflow_id: String,
    pub trigger_url: Option<String>,
    /// Version after the deploy was committed
    pub version: i64,
    /// Remote workflow replaced by this deploy, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_engine_workflow_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTriggerReceipt {
    pub workflow_id: String,
    pub status: u16,
    pub attempts: u32,
}

/// A remote workflow that may exist without a matching local record.
/// Logged and appended to the failure message, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedResource {
    pub workflow_id: String,
    pub engine_workflow_id: String,
}

impl OrphanedResource {
    pub fn note(&self) -> String {
        format!(
            "engine workflow '{}' was created but not recorded and may require manual cleanup",
            self.engine_workflow_id
        )
    }

    pub fn log(&self) {
        tracing::warn!(
            "⚠️ Orphaned engine workflow {} for workflow {}: local and remote state may have diverged",
            self.engine_workflow_id,
            self.workflow_id
        );
    }
}
