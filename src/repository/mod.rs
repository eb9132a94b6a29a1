/// Persistence contract
///
/// The orchestrator, audit trail and secret manager only see these traits. Every
/// method that changes workflow status also appends its audit event inside the same
/// transaction. [`SqliteRepository`] is the shipped implementation.

pub mod sqlite;

pub use sqlite::SqliteRepository;

use crate::audit::{AuditEvent, ExecutionPhase};
use crate::error::{Result, TesseraError};
use crate::organization::{Member, Organization};
use crate::vault::{SecretRecord, SecretSummary};
use crate::workflow::WorkflowSpecification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Approved,
    Deployed,
    Paused,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Deployed => "deployed",
            WorkflowStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = TesseraError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "draft" => Ok(WorkflowStatus::Draft),
            "approved" => Ok(WorkflowStatus::Approved),
            "deployed" => Ok(WorkflowStatus::Deployed),
            "paused" => Ok(WorkflowStatus::Paused),
            other => Err(TesseraError::Validation(format!("unknown workflow status '{}'", other))),
        }
    }
}

/// A stored workflow and its deployment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    /// Immutable snapshot; edits replace it wholesale
    pub specification: WorkflowSpecification,
    pub status: WorkflowStatus,
    /// Incremented by every successful deploy
    pub version: i64,
    pub engine_workflow_id: Option<String>,
    pub trigger_url: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// A fresh draft at version 1
    pub fn draft(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        name: impl Into<String>,
        specification: WorkflowSpecification,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            specification,
            status: WorkflowStatus::Draft,
            version: 1,
            engine_workflow_id: None,
            trigger_url: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Local half of a successful deploy, written in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentCommit {
    pub workflow_id: String,
    /// Version the deploy started from; the write is refused if it moved
    pub expected_version: i64,
    pub engine_workflow_id: String,
    pub trigger_url: Option<String>,
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn insert_workflow(&self, workflow: &WorkflowRecord, event: &AuditEvent) -> Result<()>;

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>>;

    /// Workflow and its owning organization in one read
    async fn load_workflow_with_organization(
        &self,
        id: &str,
    ) -> Result<Option<(WorkflowRecord, Organization)>>;

    async fn list_workflows(&self, organization_id: &str) -> Result<Vec<WorkflowRecord>>;

    /// Replace the specification wholesale, set the given status and bump the version.
    /// Returns false when the row no longer holds `expected_version`.
    async fn replace_specification(
        &self,
        id: &str,
        expected_version: i64,
        specification: &WorkflowSpecification,
        status: WorkflowStatus,
        event: &AuditEvent,
    ) -> Result<bool>;

    /// Conditional status change; returns false when the row was not in `from`
    async fn transition_status(
        &self,
        id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
        event: &AuditEvent,
    ) -> Result<bool>;

    /// status=deployed, version+1, engine id and trigger URL, plus the DEPLOYED event.
    /// Returns the new version, or `None` when `expected_version` no longer matches.
    async fn commit_deployment(
        &self,
        commit: &DeploymentCommit,
        event: &AuditEvent,
    ) -> Result<Option<i64>>;

    /// Delete the workflow and, by cascade, its audit events
    async fn delete_workflow(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn upsert_organization(&self, organization: &Organization) -> Result<()>;

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>>;

    async fn upsert_member(&self, member: &Member) -> Result<()>;

    async fn get_member(&self, user_id: &str) -> Result<Option<Member>>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert_audit_event(&self, event: &AuditEvent) -> Result<()>;

    /// Insert an execution event unless its (workflow, execution, phase) slot is taken.
    /// Returns the id of the stored event, new or existing.
    async fn insert_execution_event(&self, event: &AuditEvent) -> Result<String>;

    async fn find_execution_event(
        &self,
        workflow_id: &str,
        execution_id: &str,
        phase: ExecutionPhase,
    ) -> Result<Option<AuditEvent>>;

    /// Oldest first
    async fn list_audit_events(&self, workflow_id: &str) -> Result<Vec<AuditEvent>>;

    async fn count_audit_events(&self, organization_id: &str) -> Result<i64>;
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Fails with `Conflict` when the (organization, key) pair exists
    async fn insert_secret(&self, secret: &SecretRecord) -> Result<()>;

    async fn get_secret(&self, organization_id: &str, key_name: &str) -> Result<Option<SecretRecord>>;

    async fn delete_secret(&self, organization_id: &str, key_name: &str) -> Result<bool>;

    /// Delete any existing (organization, key) row and insert `secret` in one transaction.
    /// Returns whether a previous value was removed.
    async fn replace_secret(&self, secret: &SecretRecord) -> Result<bool>;

    async fn list_secrets(&self, organization_id: &str) -> Result<Vec<SecretSummary>>;
}

/// Everything the control plane needs from storage
pub trait Repository:
    WorkflowRepository + OrganizationRepository + AuditRepository + SecretRepository
{
}

impl<T> Repository for T where
    T: WorkflowRepository + OrganizationRepository + AuditRepository + SecretRepository
{
}
