/// Specification -> engine graph compiler
///
/// A deterministic pure transform with no I/O. It never fails: unknown node kinds
/// or data shapes compile to a passthrough node, and edges whose endpoints do not
/// resolve are dropped. Structural problems are the validator's job.

pub mod graph;

pub use graph::{
    CompiledEngineGraph, ConnectionTarget, EngineMeta, EngineNode, EngineSettings,
    NodeConnections, MAIN_SLOT,
};

use crate::workflow::types::{
    ActionTarget, NodeData, NodeKind, TriggerSource, WorkflowNode, WorkflowSpecification,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const WEBHOOK_NODE: &str = "n8n-nodes-base.webhook";
pub const CRON_NODE: &str = "n8n-nodes-base.cron";
pub const HTTP_REQUEST_NODE: &str = "n8n-nodes-base.httpRequest";
pub const POSTGRES_NODE: &str = "n8n-nodes-base.postgres";
pub const EXECUTE_WORKFLOW_NODE: &str = "n8n-nodes-base.executeWorkflow";
pub const CODE_NODE: &str = "n8n-nodes-base.code";
pub const NOOP_NODE: &str = "n8n-nodes-base.noOp";

/// Default execution timeout when the spec carries none
pub const DEFAULT_TIMEOUT_FLOOR_SECS: i64 = 300;

const EXECUTION_ORDER: &str = "v1";
const INSTANCE_ID: &str = "tessera-control-plane";

/// Compiles specifications into the engine's node/connection schema
#[derive(Debug, Clone)]
pub struct EngineCompiler {
    /// Deployment id is appended to this to form each node's callback URL
    callback_base_url: String,
    timeout_floor_secs: i64,
}

impl EngineCompiler {
    pub fn new(callback_base_url: impl Into<String>) -> Self {
        Self {
            callback_base_url: callback_base_url.into(),
            timeout_floor_secs: DEFAULT_TIMEOUT_FLOOR_SECS,
        }
    }

    pub fn with_timeout_floor(mut self, seconds: i64) -> Self {
        self.timeout_floor_secs = seconds;
        self
    }

    /// Callback URL the engine reports execution status to
    pub fn callback_url(&self, deployment_id: &str) -> String {
        format!("{}/{}", self.callback_base_url.trim_end_matches('/'), deployment_id)
    }

    /// Compile a specification for the given deployment
    pub fn compile(&self, spec: &WorkflowSpecification, deployment_id: &str) -> CompiledEngineGraph {
        let names: HashMap<&str, &str> = spec
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), node.name.as_str()))
            .collect();

        let nodes = spec
            .nodes
            .iter()
            .map(|node| EngineNode {
                id: node.id.clone(),
                name: node.name.clone(),
                node_type: engine_node_type(node).to_string(),
                type_version: 1,
                position: [node.position.x, node.position.y],
                parameters: self.node_parameters(node, deployment_id),
            })
            .collect();

        let mut connections: BTreeMap<String, NodeConnections> = BTreeMap::new();
        for edge in &spec.edges {
            let (Some(source), Some(target)) = (
                names.get(edge.source.as_str()),
                names.get(edge.target.as_str()),
            ) else {
                tracing::debug!(
                    "⏭️ Dropping edge '{}' with unresolved endpoint ({} -> {})",
                    edge.id,
                    edge.source,
                    edge.target
                );
                continue;
            };

            let entry = connections.entry((*source).to_string()).or_default();
            if entry.main.is_empty() {
                entry.main.push(Vec::new());
            }
            entry.main[0].push(ConnectionTarget {
                node: (*target).to_string(),
                slot: MAIN_SLOT.to_string(),
                index: 0,
            });
        }

        let execution_timeout_seconds = spec
            .metadata
            .expected_timeout_seconds
            .filter(|seconds| *seconds > 0)
            .unwrap_or(self.timeout_floor_secs);

        CompiledEngineGraph {
            nodes,
            connections,
            settings: EngineSettings {
                execution_order: EXECUTION_ORDER.to_string(),
                execution_timeout_seconds,
            },
            static_data: None,
            meta: EngineMeta {
                instance_id: INSTANCE_ID.to_string(),
            },
        }
    }

    fn node_parameters(&self, node: &WorkflowNode, deployment_id: &str) -> Map<String, Value> {
        let mut params = project_data(node, deployment_id);

        // Injected last: node data must never override correlation identity.
        params.insert("correlationId".to_string(), json!(deployment_id));
        params.insert("callbackUrl".to_string(), json!(self.callback_url(deployment_id)));
        params
    }
}

/// Total dispatch from (kind, data) to the engine node type
pub fn engine_node_type(node: &WorkflowNode) -> &'static str {
    match (&node.kind, &node.data) {
        (NodeKind::Trigger, NodeData::Trigger(TriggerSource::Webhook { .. })) => WEBHOOK_NODE,
        (NodeKind::Trigger, NodeData::Trigger(TriggerSource::Schedule { .. })) => CRON_NODE,
        (NodeKind::Trigger, NodeData::Trigger(TriggerSource::Event { .. })) => WEBHOOK_NODE,
        (NodeKind::Action, NodeData::Action(ActionTarget::HttpRequest { .. })) => HTTP_REQUEST_NODE,
        (NodeKind::Action, NodeData::Action(ActionTarget::DatabaseUpsert { .. })) => POSTGRES_NODE,
        (NodeKind::Action, NodeData::Action(ActionTarget::EngineWorkflow { .. })) => {
            EXECUTE_WORKFLOW_NODE
        }
        (NodeKind::Transform, _) => CODE_NODE,
        _ => NOOP_NODE,
    }
}

fn project_data(node: &WorkflowNode, deployment_id: &str) -> Map<String, Value> {
    let mut params = Map::new();
    match &node.data {
        NodeData::Trigger(TriggerSource::Webhook { path, method }) => {
            let path = if path.is_empty() { deployment_id } else { path.as_str() };
            params.insert("path".to_string(), json!(path));
            params.insert("httpMethod".to_string(), json!(method.as_str()));
            params.insert("responseMode".to_string(), json!("onReceived"));
        }
        NodeData::Trigger(TriggerSource::Schedule { cron }) => {
            params.insert("cronExpression".to_string(), json!(cron));
        }
        NodeData::Trigger(TriggerSource::Event { topic }) => {
            params.insert("path".to_string(), json!(topic));
            params.insert("httpMethod".to_string(), json!("POST"));
            params.insert("responseMode".to_string(), json!("onReceived"));
            params.insert("topic".to_string(), json!(topic));
        }
        NodeData::Action(ActionTarget::HttpRequest {
            url,
            method,
            body,
            headers,
        }) => {
            params.insert("url".to_string(), json!(url));
            params.insert("method".to_string(), json!(method.as_str()));
            params.insert("sendBody".to_string(), json!(body.is_some()));
            if let Some(body) = body {
                params.insert("specifyBody".to_string(), json!("json"));
                params.insert("jsonBody".to_string(), json!(body.to_string()));
            }
            if let Some(headers) = headers {
                let list: Vec<Value> = headers
                    .iter()
                    .map(|(name, value)| json!({ "name": name, "value": value }))
                    .collect();
                params.insert("sendHeaders".to_string(), json!(true));
                params.insert("headerParameters".to_string(), json!({ "parameters": list }));
            }
        }
        NodeData::Action(ActionTarget::DatabaseUpsert { table }) => {
            params.insert("operation".to_string(), json!("upsert"));
            params.insert("table".to_string(), json!(table));
        }
        NodeData::Action(ActionTarget::EngineWorkflow { workflow_id }) => {
            params.insert("source".to_string(), json!("database"));
            params.insert("workflowId".to_string(), json!(workflow_id));
        }
        NodeData::Untyped(map) => {
            params.extend(map.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
    }
    params
}
