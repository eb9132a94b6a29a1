/// Deployment lifecycle orchestrator
///
/// Owns every workflow status transition. Deploy sequences entitlement, validation,
/// secret resolution and compilation (all side-effect free) before any engine call,
/// then create -> activate -> read-back -> deactivate/settle/reactivate against the
/// engine, and finally commits status, version and audit row in one transaction.
/// Engine side effects are never rolled back; a failure after `create` reports the
/// remote workflow as possibly orphaned.

use crate::audit::{AuditAction, AuditEvent, AuditTrail, ExecutionReport};
use crate::compiler::{EngineCompiler, WEBHOOK_NODE};
use crate::config::{DeployConfig, EngineConfig, RedeployPolicy};
use crate::deploy::lock::WorkflowLocks;
use crate::deploy::types::{
    DeploymentReceipt, OperationResult, OrphanedResource, TestTriggerReceipt,
};
use crate::engine::retry::{any_failure, not_found_only};
use crate::engine::{retry_with, EngineClient, EngineWorkflow, RetryPolicy, TriggerClient};
use crate::entitlement::{can_approve, can_deploy, can_perform, Capability};
use crate::error::{Result, TesseraError};
use crate::organization::ActingUser;
use crate::repository::{DeploymentCommit, Repository, WorkflowRecord, WorkflowStatus};
use crate::vault::SecretManager;
use crate::workflow::{templates, validate_for_deploy, validate_structure, WorkflowSpecification};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const ENGINE_NAME_PREFIX: &str = "TESSERA_";
const TEST_TRIGGER_MESSAGE: &str = "Tessera test payload";

pub struct DeploymentOrchestrator {
    repository: Arc<dyn Repository>,
    engine: Arc<dyn EngineClient>,
    secrets: SecretManager,
    audit: AuditTrail,
    compiler: EngineCompiler,
    trigger: TriggerClient,
    locks: WorkflowLocks,
    config: DeployConfig,
    webhook_base_url: String,
}

impl DeploymentOrchestrator {
    pub fn new(
        repository: Arc<dyn Repository>,
        engine: Arc<dyn EngineClient>,
        secrets: SecretManager,
        engine_config: &EngineConfig,
        config: DeployConfig,
    ) -> Result<Self> {
        let compiler = EngineCompiler::new(&engine_config.callback_base_url)
            .with_timeout_floor(config.execution_timeout_floor_secs);
        let trigger = TriggerClient::new(Duration::from_secs(engine_config.request_timeout_secs))?;

        Ok(Self {
            audit: AuditTrail::new(repository.clone()),
            repository,
            engine,
            secrets,
            compiler,
            trigger,
            locks: WorkflowLocks::new(),
            config,
            webhook_base_url: engine_config.webhook_base_url.clone(),
        })
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn secrets(&self) -> &SecretManager {
        &self.secrets
    }

    pub fn compiler(&self) -> &EngineCompiler {
        &self.compiler
    }

    // ---- authoring ---------------------------------------------------------

    /// Store a new draft
    pub async fn create_workflow(
        &self,
        actor: &ActingUser,
        name: &str,
        specification: WorkflowSpecification,
    ) -> OperationResult<WorkflowRecord> {
        finish("create", None, self.try_create(actor, name, specification).await)
    }

    /// Store a new draft seeded from a built-in blueprint
    pub async fn create_from_template(
        &self,
        actor: &ActingUser,
        template_id: &str,
        name: Option<&str>,
    ) -> OperationResult<WorkflowRecord> {
        let Some(specification) = templates::blueprint(template_id) else {
            return OperationResult::failure(
                TesseraError::NotFound(format!("template '{}'", template_id)).to_string(),
            );
        };
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| templates::default_name(template_id));
        self.create_workflow(actor, &name, specification).await
    }

    /// Replace the specification wholesale; an approved workflow drops back to draft
    pub async fn update_specification(
        &self,
        workflow_id: &str,
        actor: &ActingUser,
        specification: WorkflowSpecification,
    ) -> OperationResult<WorkflowRecord> {
        let _guard = self.locks.acquire(workflow_id).await;
        let result = self.try_update(workflow_id, actor, specification).await;
        finish("update", Some(workflow_id), result)
    }

    /// Four-eyes approval: draft -> approved
    pub async fn approve(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<WorkflowRecord> {
        finish("approve", Some(workflow_id), self.try_approve(workflow_id, actor).await)
    }

    pub async fn get_workflow(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<WorkflowRecord> {
        OperationResult::from_result(self.load_owned(workflow_id, actor).await)
    }

    pub async fn list_workflows(&self, actor: &ActingUser) -> OperationResult<Vec<WorkflowRecord>> {
        OperationResult::from_result(self.repository.list_workflows(&actor.organization_id).await)
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Compile and register the workflow with the engine
    pub async fn deploy(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<DeploymentReceipt> {
        let _guard = self.locks.acquire(workflow_id).await;

        let mut orphan = None;
        match self.try_deploy(workflow_id, actor, &mut orphan).await {
            Ok(receipt) => OperationResult::ok(receipt),
            Err(err) => {
                let message = match orphan {
                    Some(orphan) => {
                        orphan.log();
                        format!("{}; {}", err, orphan.note())
                    }
                    None => err.to_string(),
                };
                tracing::error!("❌ Deploy of workflow {} failed: {}", workflow_id, message);
                OperationResult::failure(message)
            }
        }
    }

    /// deployed -> paused, deactivating the remote workflow
    pub async fn pause(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<WorkflowRecord> {
        let _guard = self.locks.acquire(workflow_id).await;
        let result = self
            .try_toggle(workflow_id, actor, WorkflowStatus::Deployed, WorkflowStatus::Paused)
            .await;
        finish("pause", Some(workflow_id), result)
    }

    /// paused -> deployed, reactivating the remote workflow
    pub async fn resume(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<WorkflowRecord> {
        let _guard = self.locks.acquire(workflow_id).await;
        let result = self
            .try_toggle(workflow_id, actor, WorkflowStatus::Paused, WorkflowStatus::Deployed)
            .await;
        finish("resume", Some(workflow_id), result)
    }

    /// Best-effort remote delete, then unconditional local delete.
    /// `data` is false when there was nothing left to delete.
    pub async fn delete(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<bool> {
        let _guard = self.locks.acquire(workflow_id).await;
        finish("delete", Some(workflow_id), self.try_delete(workflow_id, actor).await)
    }

    /// Fire a test event at the workflow's trigger URL
    pub async fn test_trigger(&self, workflow_id: &str, actor: &ActingUser) -> OperationResult<TestTriggerReceipt> {
        let workflow = match self.load_owned(workflow_id, actor).await {
            Ok(workflow) => workflow,
            Err(err) => return OperationResult::failure(err.to_string()),
        };
        let Some(url) = workflow.trigger_url else {
            return OperationResult::failure(
                TesseraError::Validation(format!(
                    "workflow '{}' has no trigger URL; deploy it first",
                    workflow_id
                ))
                .to_string(),
            );
        };
        self.test_trigger_url(&url, workflow_id, self.config.test_trigger_attempts)
            .await
    }

    /// POST a test event to `url`, retrying only while the engine answers 404
    pub async fn test_trigger_url(
        &self,
        url: &str,
        workflow_id: &str,
        attempts: u32,
    ) -> OperationResult<TestTriggerReceipt> {
        let policy = RetryPolicy {
            max_attempts: attempts,
            ..RetryPolicy::for_test_trigger(&self.config)
        };
        let payload = json!({
            "event": "test-trigger",
            "workflowId": workflow_id,
            "timestamp": Utc::now().to_rfc3339(),
            "data": { "message": TEST_TRIGGER_MESSAGE },
        });

        let mut made = 0u32;
        let result = retry_with(
            &policy,
            "test trigger",
            || {
                made += 1;
                self.trigger.post(url, &payload)
            },
            not_found_only,
        )
        .await;

        match result {
            Ok(status) => {
                tracing::info!("🧪 Test trigger for {} accepted after {} attempt(s)", workflow_id, made);
                OperationResult::ok(TestTriggerReceipt {
                    workflow_id: workflow_id.to_string(),
                    status,
                    attempts: made,
                })
            }
            Err(err) => {
                tracing::error!("❌ Test trigger for {} failed: {}", workflow_id, err);
                OperationResult::failure(TesseraError::from(err).to_string())
            }
        }
    }

    /// Execution callback from the engine, correlated by deployment id
    pub async fn record_execution(&self, deployment_id: &str, report: &ExecutionReport) -> Result<String> {
        let workflow = self
            .repository
            .get_workflow(deployment_id)
            .await?
            .ok_or_else(|| TesseraError::NotFound(format!("deployment '{}'", deployment_id)))?;

        self.audit
            .record_execution(&workflow.organization_id, &workflow.id, report)
            .await
    }

    // ---- internals ---------------------------------------------------------

    /// Load a workflow the actor's organization owns; other tenants' workflows are not found
    async fn load_owned(&self, workflow_id: &str, actor: &ActingUser) -> Result<WorkflowRecord> {
        match self.repository.get_workflow(workflow_id).await? {
            Some(workflow) if workflow.organization_id == actor.organization_id => Ok(workflow),
            _ => Err(TesseraError::NotFound(format!("workflow '{}'", workflow_id))),
        }
    }

    async fn try_create(
        &self,
        actor: &ActingUser,
        name: &str,
        specification: WorkflowSpecification,
    ) -> Result<WorkflowRecord> {
        require(actor, Capability::Edit, "create workflows")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TesseraError::Validation("workflow name must not be empty".to_string()));
        }
        check_storable(&specification)?;

        let record = WorkflowRecord::draft(
            Uuid::new_v4().to_string(),
            &actor.organization_id,
            name,
            specification,
            Some(actor.id.clone()),
        );
        let event = AuditEvent::new(
            &actor.organization_id,
            Some(record.id.as_str()),
            AuditAction::Created,
            &actor.id,
        )
        .with_payload(json!({ "name": record.name, "newStatus": record.status.as_str() }));
        self.repository.insert_workflow(&record, &event).await?;

        tracing::info!("✅ Created workflow {} ({})", record.id, record.name);
        Ok(record)
    }

    async fn try_update(
        &self,
        workflow_id: &str,
        actor: &ActingUser,
        specification: WorkflowSpecification,
    ) -> Result<WorkflowRecord> {
        require(actor, Capability::Edit, "edit workflows")?;
        let workflow = self.load_owned(workflow_id, actor).await?;
        check_storable(&specification)?;

        let status = match workflow.status {
            WorkflowStatus::Approved => WorkflowStatus::Draft,
            other => other,
        };
        let event = AuditEvent::transition(
            &workflow.organization_id,
            &workflow.id,
            AuditAction::Updated,
            &actor.id,
            workflow.status.as_str(),
            status.as_str(),
        );
        if !self
            .repository
            .replace_specification(&workflow.id, workflow.version, &specification, status, &event)
            .await?
        {
            return Err(TesseraError::Conflict(format!(
                "workflow '{}' changed while it was being edited",
                workflow_id
            )));
        }

        self.load_owned(workflow_id, actor).await
    }

    async fn try_approve(&self, workflow_id: &str, actor: &ActingUser) -> Result<WorkflowRecord> {
        let workflow = self.load_owned(workflow_id, actor).await?;

        if !can_approve(&actor.id, workflow.created_by.as_deref(), actor.role) {
            return Err(TesseraError::Permission(format!(
                "role '{}' cannot approve this workflow; approval needs an approver or admin other than its creator",
                actor.role
            )));
        }
        if workflow.status != WorkflowStatus::Draft {
            return Err(TesseraError::Conflict(format!(
                "workflow is {}; only drafts can be approved",
                workflow.status
            )));
        }

        let event = AuditEvent::transition(
            &workflow.organization_id,
            &workflow.id,
            AuditAction::Approved,
            &actor.id,
            WorkflowStatus::Draft.as_str(),
            WorkflowStatus::Approved.as_str(),
        );
        self.transition(&workflow, WorkflowStatus::Approved, &event).await?;
        self.load_owned(workflow_id, actor).await
    }

    async fn try_deploy(
        &self,
        workflow_id: &str,
        actor: &ActingUser,
        orphan: &mut Option<OrphanedResource>,
    ) -> Result<DeploymentReceipt> {
        let (workflow, organization) = self
            .repository
            .load_workflow_with_organization(workflow_id)
            .await?
            .filter(|(workflow, _)| workflow.organization_id == actor.organization_id)
            .ok_or_else(|| TesseraError::NotFound(format!("workflow '{}'", workflow_id)))?;

        can_deploy(actor.role, &organization.plan_status).into_result()?;
        validate_for_deploy(&workflow.specification)?;
        let parameters = self.resolve_parameters(&workflow).await?;

        let graph = self
            .compiler
            .compile(&workflow.specification, &workflow.id)
            .with_parameters(parameters);
        let engine_name = engine_workflow_name(&workflow.name);
        let policy = RetryPolicy::for_engine(&self.config);

        tracing::info!(
            "🚀 Deploying workflow {} v{} as {} ({} nodes)",
            workflow.id,
            workflow.version,
            engine_name,
            graph.nodes.len()
        );

        let created = retry_with(
            &policy,
            "create",
            || self.engine.create(&engine_name, &graph),
            any_failure,
        )
        .await?;
        *orphan = Some(OrphanedResource {
            workflow_id: workflow.id.clone(),
            engine_workflow_id: created.id.clone(),
        });

        let engine_id = created.id.as_str();
        retry_with(&policy, "activate", || self.engine.activate(engine_id), any_failure).await?;
        let remote = retry_with(&policy, "get", || self.engine.get(engine_id), any_failure).await?;
        let trigger_url = resolve_trigger_url(&remote, &self.webhook_base_url, &workflow.id);

        // deactivate/settle/reactivate so the engine registers the trigger route
        retry_with(&policy, "deactivate", || self.engine.deactivate(engine_id), any_failure).await?;
        tokio::time::sleep(self.config.settle_delay()).await;
        retry_with(&policy, "reactivate", || self.engine.activate(engine_id), any_failure).await?;

        let event = AuditEvent::transition(
            &workflow.organization_id,
            &workflow.id,
            AuditAction::Deployed,
            &actor.id,
            workflow.status.as_str(),
            WorkflowStatus::Deployed.as_str(),
        )
        .with_payload(json!({
            "engineWorkflowId": engine_id,
            "triggerUrl": trigger_url,
            "previousEngineWorkflowId": workflow.engine_workflow_id,
        }));
        let commit = DeploymentCommit {
            workflow_id: workflow.id.clone(),
            expected_version: workflow.version,
            engine_workflow_id: engine_id.to_string(),
            trigger_url: trigger_url.clone(),
        };
        let version = self
            .repository
            .commit_deployment(&commit, &event)
            .await?
            .ok_or_else(|| {
                TesseraError::Conflict(format!(
                    "workflow '{}' changed while it was being deployed",
                    workflow.id
                ))
            })?;
        *orphan = None;

        let previous = workflow
            .engine_workflow_id
            .filter(|previous| previous.as_str() != engine_id);
        if let Some(previous) = &previous {
            self.apply_redeploy_policy(&workflow.id, previous).await;
        }

        tracing::info!(
            "✅ Workflow {} deployed as engine workflow {} (v{})",
            workflow.id,
            engine_id,
            version
        );

        Ok(DeploymentReceipt {
            workflow_id: workflow.id,
            engine_workflow_id: created.id,
            trigger_url,
            version,
            previous_engine_workflow_id: previous,
        })
    }

    async fn apply_redeploy_policy(&self, workflow_id: &str, previous: &str) {
        match self.config.redeploy_policy {
            RedeployPolicy::Retain => {
                tracing::info!(
                    "📦 Keeping previous engine workflow {} of {} as rollback target",
                    previous,
                    workflow_id
                );
            }
            RedeployPolicy::DeletePrevious => {
                if let Err(err) = self.engine.delete(previous).await {
                    tracing::warn!(
                        "⚠️ Could not delete previous engine workflow {} of {}: {}",
                        previous,
                        workflow_id,
                        err
                    );
                }
            }
        }
    }

    /// Decrypt declared secret parameters; missing required ones abort the deploy
    async fn resolve_parameters(&self, workflow: &WorkflowRecord) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        let mut missing = Vec::new();

        for declaration in workflow.specification.secret_parameters() {
            match self
                .secrets
                .resolve(&workflow.organization_id, &declaration.key)
                .await?
            {
                Some(value) => {
                    resolved.insert(declaration.key.clone(), Value::String(value));
                }
                None if declaration.required => missing.push(declaration.key.as_str()),
                None => {}
            }
        }

        if !missing.is_empty() {
            return Err(TesseraError::Validation(format!(
                "missing required secret parameter(s): {}",
                missing.join(", ")
            )));
        }
        Ok(resolved)
    }

    async fn try_toggle(
        &self,
        workflow_id: &str,
        actor: &ActingUser,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<WorkflowRecord> {
        let (workflow, organization) = self
            .repository
            .load_workflow_with_organization(workflow_id)
            .await?
            .filter(|(workflow, _)| workflow.organization_id == actor.organization_id)
            .ok_or_else(|| TesseraError::NotFound(format!("workflow '{}'", workflow_id)))?;

        let action = if to == WorkflowStatus::Paused {
            require(actor, Capability::Deploy, "pause workflows")?;
            AuditAction::Paused
        } else {
            // resuming runs the workflow again, so the plan must still permit it
            can_deploy(actor.role, &organization.plan_status).into_result()?;
            AuditAction::Resumed
        };

        if workflow.status != from {
            return Err(TesseraError::Conflict(format!(
                "workflow is {}, expected {}",
                workflow.status, from
            )));
        }
        let engine_id = workflow.engine_workflow_id.clone().ok_or_else(|| {
            TesseraError::Conflict(format!("workflow '{}' has no engine workflow", workflow_id))
        })?;

        let policy = RetryPolicy::for_engine(&self.config);
        if to == WorkflowStatus::Paused {
            retry_with(&policy, "deactivate", || self.engine.deactivate(&engine_id), any_failure)
                .await?;
        } else {
            retry_with(&policy, "activate", || self.engine.activate(&engine_id), any_failure).await?;
        }

        let event = AuditEvent::transition(
            &workflow.organization_id,
            &workflow.id,
            action,
            &actor.id,
            from.as_str(),
            to.as_str(),
        )
        .with_payload(json!({ "engineWorkflowId": engine_id }));
        self.transition(&workflow, to, &event).await?;

        tracing::info!("⏯️ Workflow {} is now {}", workflow.id, to);
        self.load_owned(workflow_id, actor).await
    }

    async fn transition(&self, workflow: &WorkflowRecord, to: WorkflowStatus, event: &AuditEvent) -> Result<()> {
        if self
            .repository
            .transition_status(&workflow.id, workflow.status, to, event)
            .await?
        {
            Ok(())
        } else {
            Err(TesseraError::Conflict(format!(
                "workflow '{}' changed status concurrently",
                workflow.id
            )))
        }
    }

    async fn try_delete(&self, workflow_id: &str, actor: &ActingUser) -> Result<bool> {
        let Some(workflow) = self.repository.get_workflow(workflow_id).await? else {
            tracing::info!("🗑️ Workflow {} already deleted", workflow_id);
            return Ok(false);
        };
        if workflow.organization_id != actor.organization_id {
            return Err(TesseraError::NotFound(format!("workflow '{}'", workflow_id)));
        }
        require(actor, Capability::Edit, "delete workflows")?;

        if let Some(engine_id) = &workflow.engine_workflow_id {
            if let Err(err) = self.engine.delete(engine_id).await {
                tracing::warn!(
                    "⚠️ Remote delete of engine workflow {} failed, deleting locally anyway: {}",
                    engine_id,
                    err
                );
            }
        }

        let removed = self.repository.delete_workflow(&workflow.id).await?;
        tracing::info!("🗑️ Deleted workflow {}", workflow.id);
        Ok(removed)
    }
}

fn finish<T>(operation: &str, workflow_id: Option<&str>, result: Result<T>) -> OperationResult<T> {
    if let Err(err) = &result {
        tracing::error!(
            "❌ {} {} failed ({}): {}",
            operation,
            workflow_id.unwrap_or("workflow"),
            err.kind(),
            err
        );
    }
    OperationResult::from_result(result)
}

fn require(actor: &ActingUser, capability: Capability, what: &str) -> Result<()> {
    if can_perform(actor.role, capability) {
        Ok(())
    } else {
        Err(TesseraError::Permission(format!(
            "role '{}' is not permitted to {}",
            actor.role, what
        )))
    }
}

/// Stored specifications may lack a trigger but must be structurally sound
fn check_storable(specification: &WorkflowSpecification) -> Result<()> {
    let report = validate_structure(specification);
    if report.is_valid() {
        return Ok(());
    }
    let message = report
        .errors()
        .map(|issue| format!("{} {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(TesseraError::Validation(message))
}

/// Remote name: prefix plus the workflow name with whitespace runs collapsed to `_`
pub fn engine_workflow_name(name: &str) -> String {
    format!(
        "{}{}",
        ENGINE_NAME_PREFIX,
        name.split_whitespace().collect::<Vec<_>>().join("_")
    )
}

/// Prefer the URL the engine reports; else rebuild it from the first webhook node
pub fn resolve_trigger_url(
    remote: &EngineWorkflow,
    webhook_base_url: &str,
    deployment_id: &str,
) -> Option<String> {
    if let Some(url) = remote.trigger_url.as_deref().filter(|url| !url.is_empty()) {
        return Some(url.to_string());
    }

    let node = remote.nodes.iter().find(|node| node.node_type == WEBHOOK_NODE)?;
    let path = node
        .parameters
        .get("path")
        .and_then(Value::as_str)
        .map(|path| path.trim_matches('/'))
        .filter(|path| !path.is_empty())
        .unwrap_or(deployment_id);

    Some(format!(
        "{}/webhook/{}/{}",
        webhook_base_url.trim_end_matches('/'),
        remote.id,
        path
    ))
}
