/// Core specification type definitions
///
/// A specification is a small typed DAG of triggers, actions and transforms. It is
/// stored as JSON and replaced wholesale on every edit. Node `data` is a union keyed
/// by the node kind; data that does not match the kind's typed shape is kept as an
/// untyped mapping so decoding never fails on node contents.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A complete automation specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpecification {
    /// Schema version of the specification (e.g. "1.0.0")
    pub version: String,
    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    /// Edges in declaration order; order is preserved but carries no meaning
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub metadata: SpecMetadata,
    /// Parameters a deployment must be able to resolve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterDeclaration>>,
}

impl WorkflowSpecification {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// All TRIGGER nodes, in declaration order
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|node| node.kind == NodeKind::Trigger)
    }

    /// Declared parameters of kind `secret`
    pub fn secret_parameters(&self) -> impl Iterator<Item = &ParameterDeclaration> {
        self.parameters
            .iter()
            .flatten()
            .filter(|param| param.kind == ParameterKind::Secret)
    }
}

/// Execution hints carried alongside the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecMetadata {
    #[serde(
        rename = "expectedTimeout",
        alias = "expectedTimeoutSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_timeout_seconds: Option<i64>,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Text,
    Secret,
}

/// Kind of a specification node
///
/// Unrecognized kinds are preserved verbatim in `Other` and compile to a passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Trigger,
    Action,
    Transform,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Trigger => "TRIGGER",
            NodeKind::Action => "ACTION",
            NodeKind::Transform => "TRANSFORM",
            NodeKind::Other(name) => name,
        }
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TRIGGER" => NodeKind::Trigger,
            "ACTION" => NodeKind::Action,
            "TRANSFORM" => NodeKind::Transform,
            _ => NodeKind::Other(value),
        }
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(NodeKind::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

fn default_post() -> HttpMethod {
    HttpMethod::Post
}

fn default_get() -> HttpMethod {
    HttpMethod::Get
}

/// What starts a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    /// Inbound HTTP call; an empty path falls back to the deployment id
    Webhook {
        #[serde(default)]
        path: String,
        #[serde(default = "default_post")]
        method: HttpMethod,
    },
    Schedule {
        cron: String,
    },
    Event {
        topic: String,
    },
}

/// What an action node does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTarget {
    HttpRequest {
        url: String,
        #[serde(default = "default_get")]
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
    DatabaseUpsert {
        table: String,
    },
    /// Invoke another workflow already living in the engine
    #[serde(rename = "ENGINE_WORKFLOW", alias = "N8N_WORKFLOW")]
    EngineWorkflow {
        #[serde(rename = "workflowId")]
        workflow_id: String,
    },
}

/// Per-kind node payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeData {
    Trigger(TriggerSource),
    Action(ActionTarget),
    /// TRANSFORM nodes, unrecognized kinds, and data that does not fit the kind's shape
    Untyped(Map<String, Value>),
}

impl Default for NodeData {
    fn default() -> Self {
        NodeData::Untyped(Map::new())
    }
}

impl NodeData {
    /// Interpret raw JSON according to the node kind, falling back to an untyped mapping
    pub fn from_value(kind: &NodeKind, value: Value) -> Self {
        let typed = match kind {
            NodeKind::Trigger => serde_json::from_value::<TriggerSource>(value.clone())
                .ok()
                .map(NodeData::Trigger),
            NodeKind::Action => serde_json::from_value::<ActionTarget>(value.clone())
                .ok()
                .map(NodeData::Action),
            NodeKind::Transform | NodeKind::Other(_) => None,
        };

        typed.unwrap_or_else(|| match value {
            Value::Object(map) => NodeData::Untyped(map),
            _ => NodeData::default(),
        })
    }
}

/// A single node in the specification DAG
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowNode {
    /// Unique node identifier within the specification
    pub id: String,
    /// Display name; the engine keys connections by it, so it need not be unique
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub data: NodeData,
    /// Presentation-only, carried through verbatim
    pub position: Position,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    position: Position,
}

impl<'de> Deserialize<'de> for WorkflowNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawNode::deserialize(deserializer)?;
        let data = NodeData::from_value(&raw.kind, raw.data);
        Ok(WorkflowNode {
            id: raw.id,
            name: raw.name,
            kind: raw.kind,
            data,
            position: raw.position,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Connection between two nodes, by node id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
}
