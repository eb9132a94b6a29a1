/// Append-only, causally threaded audit log
///
/// Events are never updated; they disappear only when their workflow or organization
/// is deleted. Execution events carry an explicit `(execution_id, phase)` index so a
/// thread can be rebuilt without scanning parent links. A START without a completion
/// is the permanent `Pending` state, not an error.

use crate::error::Result;
use crate::repository::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Updated,
    Approved,
    Deployed,
    Paused,
    Resumed,
    ExecutionStart,
    ExecutionSuccess,
    ExecutionFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "CREATED",
            AuditAction::Updated => "UPDATED",
            AuditAction::Approved => "APPROVED",
            AuditAction::Deployed => "DEPLOYED",
            AuditAction::Paused => "PAUSED",
            AuditAction::Resumed => "RESUMED",
            AuditAction::ExecutionStart => "EXECUTION_START",
            AuditAction::ExecutionSuccess => "EXECUTION_SUCCESS",
            AuditAction::ExecutionFailed => "EXECUTION_FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let action = match value {
            "CREATED" => AuditAction::Created,
            "UPDATED" => AuditAction::Updated,
            "APPROVED" => AuditAction::Approved,
            "DEPLOYED" => AuditAction::Deployed,
            "PAUSED" => AuditAction::Paused,
            "RESUMED" => AuditAction::Resumed,
            "EXECUTION_START" => AuditAction::ExecutionStart,
            "EXECUTION_SUCCESS" => AuditAction::ExecutionSuccess,
            "EXECUTION_FAILED" => AuditAction::ExecutionFailed,
            _ => return None,
        };
        Some(action)
    }

    pub fn phase(&self) -> Option<ExecutionPhase> {
        match self {
            AuditAction::ExecutionStart => Some(ExecutionPhase::Start),
            AuditAction::ExecutionSuccess => Some(ExecutionPhase::Success),
            AuditAction::ExecutionFailed => Some(ExecutionPhase::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    Start,
    Success,
    Failed,
}

impl ExecutionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionPhase::Start => "start",
            ExecutionPhase::Success => "success",
            ExecutionPhase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub parent_id: Option<String>,
    pub organization_id: String,
    pub workflow_id: Option<String>,
    pub action: AuditAction,
    pub actor_id: String,
    pub payload: Value,
    /// Set for execution events only
    pub execution_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        organization_id: &str,
        workflow_id: Option<&str>,
        action: AuditAction,
        actor_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            organization_id: organization_id.to_string(),
            workflow_id: workflow_id.map(str::to_string),
            action,
            actor_id: actor_id.to_string(),
            payload: json!({}),
            execution_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Lifecycle transition with `{previousStatus, newStatus}` merged into the payload
    pub fn transition(
        organization_id: &str,
        workflow_id: &str,
        action: AuditAction,
        actor_id: &str,
        previous_status: &str,
        new_status: &str,
    ) -> Self {
        Self::new(organization_id, Some(workflow_id), action, actor_id).with_payload(json!({
            "previousStatus": previous_status,
            "newStatus": new_status,
        }))
    }

    /// Merge object fields into the payload; non-object values replace it
    pub fn with_payload(mut self, payload: Value) -> Self {
        match (&mut self.payload, payload) {
            (Value::Object(existing), Value::Object(extra)) => existing.extend(extra),
            (slot, other) => *slot = other,
        }
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn for_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn phase(&self) -> Option<ExecutionPhase> {
        self.action.phase()
    }
}

/// Status reported by the engine for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[serde(alias = "started", alias = "start", alias = "waiting")]
    Running,
    #[serde(alias = "succeeded", alias = "completed")]
    Success,
    #[serde(alias = "error", alias = "failed", alias = "crashed", alias = "canceled")]
    Failure,
}

impl ExecutionStatus {
    fn action(&self) -> AuditAction {
        match self {
            ExecutionStatus::Running => AuditAction::ExecutionStart,
            ExecutionStatus::Success => AuditAction::ExecutionSuccess,
            ExecutionStatus::Failure => AuditAction::ExecutionFailed,
        }
    }
}

/// Callback body posted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionThread {
    pub start: AuditEvent,
    pub completion: Option<AuditEvent>,
}

impl ExecutionThread {
    pub fn state(&self) -> ThreadState {
        match self.completion.as_ref().and_then(AuditEvent::phase) {
            Some(ExecutionPhase::Success) => ThreadState::Succeeded,
            Some(ExecutionPhase::Failed) => ThreadState::Failed,
            _ => ThreadState::Pending,
        }
    }
}

pub const SYSTEM_ACTOR: &str = "system";

/// Write/read facade over the audit tables
#[derive(Clone)]
pub struct AuditTrail {
    repository: Arc<dyn Repository>,
}

impl AuditTrail {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Append one event and return its id
    pub async fn record(&self, event: AuditEvent) -> Result<String> {
        self.repository.insert_audit_event(&event).await?;
        tracing::debug!("📝 Audit {} recorded for org {}", event.action.as_str(), event.organization_id);
        Ok(event.id)
    }

    /// Record an engine execution callback, threading completions under their START.
    ///
    /// The START row is always persisted (or found) before a child referencing it is
    /// written. Each (workflow, execution, phase) slot holds one event, so repeated or
    /// concurrent callbacks for the same phase return the stored event id.
    pub async fn record_execution(
        &self,
        organization_id: &str,
        workflow_id: &str,
        report: &ExecutionReport,
    ) -> Result<String> {
        let action = report.status.action();

        let mut payload = json!({ "executionId": report.execution_id });
        if let Some(error) = &report.error {
            payload["errorMessage"] = json!(error);
        }

        if action == AuditAction::ExecutionStart {
            let start = AuditEvent::new(organization_id, Some(workflow_id), action, SYSTEM_ACTOR)
                .for_execution(&report.execution_id)
                .with_payload(payload);
            return self.repository.insert_execution_event(&start).await;
        }

        let start_id = match self
            .repository
            .find_execution_event(workflow_id, &report.execution_id, ExecutionPhase::Start)
            .await?
        {
            Some(start) => start.id,
            None => {
                tracing::debug!(
                    "🧵 No START for execution {}, recording one before its completion",
                    report.execution_id
                );
                let start = AuditEvent::new(
                    organization_id,
                    Some(workflow_id),
                    AuditAction::ExecutionStart,
                    SYSTEM_ACTOR,
                )
                .for_execution(&report.execution_id)
                .with_payload(json!({ "executionId": report.execution_id, "synthesized": true }));
                // a START that landed meanwhile wins the slot and its id comes back
                self.repository.insert_execution_event(&start).await?
            }
        };

        let completion = AuditEvent::new(organization_id, Some(workflow_id), action, SYSTEM_ACTOR)
            .for_execution(&report.execution_id)
            .with_parent(start_id)
            .with_payload(payload);
        self.repository.insert_execution_event(&completion).await
    }

    /// Rebuild an execution thread of a workflow from the phase index
    pub async fn execution_thread(
        &self,
        workflow_id: &str,
        execution_id: &str,
    ) -> Result<Option<ExecutionThread>> {
        let Some(start) = self
            .repository
            .find_execution_event(workflow_id, execution_id, ExecutionPhase::Start)
            .await?
        else {
            return Ok(None);
        };

        let mut completion = self
            .repository
            .find_execution_event(workflow_id, execution_id, ExecutionPhase::Success)
            .await?;
        if completion.is_none() {
            completion = self
                .repository
                .find_execution_event(workflow_id, execution_id, ExecutionPhase::Failed)
                .await?;
        }

        Ok(Some(ExecutionThread { start, completion }))
    }

    /// All events of a workflow, oldest first
    pub async fn workflow_history(&self, workflow_id: &str) -> Result<Vec<AuditEvent>> {
        self.repository.list_audit_events(workflow_id).await
    }
}
