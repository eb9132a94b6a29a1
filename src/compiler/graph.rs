/// Node/connection schema understood by the external engine.
///
/// Every map in here is ordered so a compiled graph serializes to identical bytes
/// for identical input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Output slot name used for every connection
pub const MAIN_SLOT: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledEngineGraph {
    pub nodes: Vec<EngineNode>,
    /// Source node name -> outputs
    pub connections: BTreeMap<String, NodeConnections>,
    pub settings: EngineSettings,
    pub static_data: Option<Value>,
    pub meta: EngineMeta,
}

impl CompiledEngineGraph {
    /// Total number of connection targets across all sources and slots
    pub fn fan_out_count(&self) -> usize {
        self.connections
            .values()
            .flat_map(|conn| conn.main.iter())
            .map(|slot| slot.len())
            .sum()
    }

    /// Targets reachable from `source_name` through the main output, in edge order
    pub fn targets_of(&self, source_name: &str) -> Vec<&ConnectionTarget> {
        self.connections
            .get(source_name)
            .map(|conn| conn.main.iter().flatten().collect())
            .unwrap_or_default()
    }

    /// Attach resolved deployment parameters under `staticData.parameters`
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        if !parameters.is_empty() {
            let mut data = Map::new();
            data.insert("parameters".to_string(), Value::Object(parameters));
            self.static_data = Some(Value::Object(data));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub type_version: u32,
    pub position: [f64; 2],
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConnections {
    /// One entry per output index; this compiler only ever fills index 0
    pub main: Vec<Vec<ConnectionTarget>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(rename = "type")]
    pub slot: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub execution_order: String,
    #[serde(rename = "executionTimeout")]
    pub execution_timeout_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMeta {
    pub instance_id: String,
}
