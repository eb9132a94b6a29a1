/// Pre-compile structural validation
///
/// Runs separately from the compiler: the compiler stays lenient and never fails,
/// while this checker decides whether a specification may be deployed. Cycles are
/// reported as warnings only; the engine owns cycle handling.

use crate::error::{Result, TesseraError};
use crate::workflow::types::{NodeKind, WorkflowSpecification};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|issue| issue.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|issue| issue.severity == Severity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    fn error(&mut self, code: &'static str, message: String, node_id: Option<String>) {
        self.issues.push(ValidationIssue {
            code,
            severity: Severity::Error,
            message,
            node_id,
        });
    }

    fn warn(&mut self, code: &'static str, message: String, node_id: Option<String>) {
        self.issues.push(ValidationIssue {
            code,
            severity: Severity::Warning,
            message,
            node_id,
        });
    }
}

/// Check the invariants every stored specification should satisfy
pub fn validate_structure(spec: &WorkflowSpecification) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index_by_id: HashMap<&str, NodeIndex> = HashMap::new();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for node in &spec.nodes {
        if index_by_id.contains_key(node.id.as_str()) {
            report.error(
                "E001",
                format!("Duplicate node id: {}", node.id),
                Some(node.id.clone()),
            );
            continue;
        }
        index_by_id.insert(node.id.as_str(), graph.add_node(node.id.as_str()));

        if !seen_names.insert(node.name.as_str()) {
            report.warn(
                "W001",
                format!(
                    "Node name '{}' is not unique; connections for nodes sharing it will be merged",
                    node.name
                ),
                Some(node.id.clone()),
            );
        }
    }

    for edge in &spec.edges {
        let source = index_by_id.get(edge.source.as_str());
        let target = index_by_id.get(edge.target.as_str());
        match (source, target) {
            (Some(&from), Some(&to)) => {
                graph.add_edge(from, to, ());
            }
            _ => {
                let missing = if source.is_none() { &edge.source } else { &edge.target };
                report.error(
                    "E002",
                    format!("Edge '{}' references unknown node: {}", edge.id, missing),
                    None,
                );
            }
        }
    }

    let mut param_keys = HashSet::new();
    for param in spec.parameters.iter().flatten() {
        if !param_keys.insert(param.key.as_str()) {
            report.error("E003", format!("Duplicate parameter key: {}", param.key), None);
        }
    }

    if is_cyclic_directed(&graph) {
        report.warn(
            "W002",
            "Specification contains a cycle; it is passed through to the engine".to_string(),
            None,
        );
    }

    let triggers: Vec<NodeIndex> = spec
        .nodes
        .iter()
        .filter(|node| node.kind == NodeKind::Trigger)
        .filter_map(|node| index_by_id.get(node.id.as_str()).copied())
        .collect();
    if !triggers.is_empty() {
        let mut reachable = HashSet::new();
        for start in triggers {
            let mut bfs = Bfs::new(&graph, start);
            while let Some(visited) = bfs.next(&graph) {
                reachable.insert(visited);
            }
        }
        for index in graph.node_indices() {
            if !reachable.contains(&index) {
                let id = graph[index].to_string();
                report.warn("W003", format!("Node '{}' is not reachable from any trigger", id), Some(id));
            }
        }
    }

    report
}

/// Structural checks plus the deployability requirement of at least one trigger
pub fn validate_for_deploy(spec: &WorkflowSpecification) -> Result<ValidationReport> {
    let mut report = validate_structure(spec);

    if spec.trigger_nodes().next().is_none() {
        report.error(
            "E004",
            "Specification has no TRIGGER node and cannot be deployed".to_string(),
            None,
        );
    }

    for warning in report.warnings() {
        tracing::debug!("⚠️ {} {}", warning.code, warning.message);
    }

    if report.is_valid() {
        Ok(report)
    } else {
        let message = report
            .errors()
            .map(|issue| format!("{} {}", issue.code, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TesseraError::Validation(message))
    }
}
