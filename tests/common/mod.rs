#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tessera::compiler::CompiledEngineGraph;
use tessera::config::{DeployConfig, EngineConfig, RedeployPolicy};
use tessera::deploy::DeploymentOrchestrator;
use tessera::engine::{
    EngineClient, EngineWorkflow, EngineWorkflowNode, EngineWorkflowRef, TransportError,
};
use tessera::entitlement::{PlanStatus, Role};
use tessera::organization::{ActingUser, Member, Organization};
use tessera::repository::{OrganizationRepository, SqliteRepository};
use tessera::vault::{SecretManager, VaultService};
use tessera::workflow::WorkflowSpecification;

pub const ORG: &str = "org-1";
pub const OTHER_ORG: &str = "org-2";
pub const WEBHOOK_BASE: &str = "https://hooks.example";
pub const CALLBACK_BASE: &str = "https://cp.example/api/executions";

/// In-process engine that records every call and can be scripted to fail
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<u16>>>,
    workflows: Mutex<HashMap<String, CompiledEngineGraph>>,
    next_id: Mutex<u32>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` calls of `operation` with `status`
    pub fn fail_next(&self, operation: &'static str, times: usize, status: u16) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(status);
        }
    }

    /// Every call as "operation:argument"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names only, in call order
    pub fn operations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.operations().iter().filter(|op| op.as_str() == operation).count()
    }

    pub fn graph(&self, id: &str) -> Option<CompiledEngineGraph> {
        self.workflows.lock().unwrap().get(id).cloned()
    }

    fn enter(&self, operation: &'static str, argument: &str) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", operation, argument));

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(status) => Err(TransportError::Status {
                operation: operation.to_string(),
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn create(
        &self,
        name: &str,
        graph: &CompiledEngineGraph,
    ) -> Result<EngineWorkflowRef, TransportError> {
        self.enter("create", name)?;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("eng-{}", *next)
        };
        self.workflows.lock().unwrap().insert(id.clone(), graph.clone());
        Ok(EngineWorkflowRef { id })
    }

    async fn activate(&self, id: &str) -> Result<(), TransportError> {
        self.enter("activate", id)
    }

    async fn deactivate(&self, id: &str) -> Result<(), TransportError> {
        self.enter("deactivate", id)
    }

    async fn get(&self, id: &str) -> Result<EngineWorkflow, TransportError> {
        self.enter("get", id)?;
        let graph = self.graph(id).ok_or_else(|| TransportError::Status {
            operation: "get".to_string(),
            status: 404,
            body: String::new(),
        })?;
        Ok(EngineWorkflow {
            id: id.to_string(),
            active: true,
            nodes: graph
                .nodes
                .iter()
                .map(|node| EngineWorkflowNode {
                    name: node.name.clone(),
                    node_type: node.node_type.clone(),
                    parameters: node.parameters.clone(),
                })
                .collect(),
            trigger_url: None,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), TransportError> {
        self.enter("delete", id)?;
        self.workflows.lock().unwrap().remove(id);
        Ok(())
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        api_url: "http://engine.invalid/api/v1".to_string(),
        api_key: "test-key".to_string(),
        webhook_base_url: WEBHOOK_BASE.to_string(),
        callback_base_url: CALLBACK_BASE.to_string(),
        request_timeout_secs: 5,
    }
}

/// Millisecond delays so retries do not slow the suite down
pub fn fast_deploy_config(policy: RedeployPolicy) -> DeployConfig {
    DeployConfig {
        retry_attempts: 3,
        retry_base_delay_ms: 1,
        settle_delay_ms: 1,
        redeploy_policy: policy,
        test_trigger_attempts: 3,
        test_trigger_base_delay_ms: 10,
        test_trigger_step_ms: 10,
        execution_timeout_floor_secs: 300,
    }
}

pub fn user(id: &str, organization_id: &str, role: Role) -> ActingUser {
    ActingUser {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        role,
    }
}

pub fn admin() -> ActingUser {
    user("admin-1", ORG, Role::Admin)
}

pub fn vault() -> Arc<VaultService> {
    Arc::new(VaultService::derive("integration-secret", b"integration-salt", 1_000).unwrap())
}

pub struct Harness {
    pub repository: Arc<SqliteRepository>,
    pub engine: Arc<FakeEngine>,
    pub orchestrator: DeploymentOrchestrator,
}

pub async fn seed(repository: &SqliteRepository, plan: PlanStatus) {
    repository
        .upsert_organization(&Organization::new(ORG, "Acme", plan))
        .await
        .unwrap();
    repository
        .upsert_organization(&Organization::new(OTHER_ORG, "Globex", PlanStatus::Active))
        .await
        .unwrap();

    let members = [
        ("admin-1", ORG, Role::Admin),
        ("admin-2", ORG, Role::Admin),
        ("dev-1", ORG, Role::Developer),
        ("approver-1", ORG, Role::Approver),
        ("viewer-1", ORG, Role::Viewer),
        ("outsider", OTHER_ORG, Role::Admin),
    ];
    for (id, organization_id, role) in members {
        repository
            .upsert_member(&Member {
                id: id.to_string(),
                organization_id: organization_id.to_string(),
                email: format!("{}@example.com", id),
                role,
            })
            .await
            .unwrap();
    }
}

pub async fn harness(plan: PlanStatus, policy: RedeployPolicy) -> Harness {
    harness_with(plan, fast_deploy_config(policy)).await
}

pub async fn harness_with(plan: PlanStatus, config: DeployConfig) -> Harness {
    let repository = Arc::new(SqliteRepository::in_memory().await.unwrap());
    seed(&repository, plan).await;

    let engine = FakeEngine::new();
    let secrets = SecretManager::new(repository.clone(), vault());
    let orchestrator = DeploymentOrchestrator::new(
        repository.clone(),
        engine.clone(),
        secrets,
        &engine_config(),
        config,
    )
    .unwrap();

    Harness {
        repository,
        engine,
        orchestrator,
    }
}

/// One webhook trigger feeding one HTTP action
pub fn webhook_spec() -> WorkflowSpecification {
    serde_json::from_value(json!({
        "version": "1.0.0",
        "nodes": [
            { "id": "t1", "name": "Inbound", "type": "TRIGGER",
              "position": { "x": 0, "y": 0 },
              "data": { "type": "WEBHOOK", "path": "in", "method": "POST" } },
            { "id": "a1", "name": "Notify", "type": "ACTION",
              "position": { "x": 200, "y": 0 },
              "data": { "type": "HTTP_REQUEST", "url": "https://e.com", "method": "POST" } }
        ],
        "edges": [{ "id": "e1", "source": "t1", "target": "a1" }],
        "metadata": { "expectedTimeout": 30, "retries": 1 }
    }))
    .unwrap()
}
