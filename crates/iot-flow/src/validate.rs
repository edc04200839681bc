//! Static flow graph checks
//!
//! [`validate`] runs at flow create/update time and rejects graphs the engine
//! must never see. [`lint`] reports suspicious but legal shapes.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::model::{FlowGraph, NodeKind};

/// Reasons a graph is rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Flow must have at least one node")]
    EmptyGraph,

    #[error("Flow must have at least one trigger node")]
    NoTrigger,

    #[error("Flow must have at least one action node")]
    NoAction,

    #[error("Flow contains a cycle")]
    CycleDetected,

    #[error("Nodes not reachable from any trigger: {}", ids.join(", "))]
    UnreachableNodes { ids: Vec<String> },

    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("Edge '{edge_id}' references missing node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Legal but probably unintended graph shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A condition node without an edge for one outcome; runs taking that
    /// outcome end silently
    MissingBranch { node_id: String, branch: bool },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::MissingBranch { node_id, branch } => {
                write!(f, "condition node '{node_id}' has no '{branch}' branch")
            }
        }
    }
}

/// Check a graph before it is persisted
///
/// Rules are applied in order and the first failure is returned.
pub fn validate(graph: &FlowGraph) -> ValidationResult<()> {
    if graph.nodes.is_empty() {
        return Err(ValidationError::EmptyGraph);
    }
    if !graph.nodes.iter().any(|n| n.kind() == Some(NodeKind::Trigger)) {
        return Err(ValidationError::NoTrigger);
    }
    if !graph.nodes.iter().any(|n| n.kind() == Some(NodeKind::Action)) {
        return Err(ValidationError::NoAction);
    }

    let adjacency = adjacency(graph);
    if has_cycle(graph, &adjacency) {
        return Err(ValidationError::CycleDetected);
    }

    let unreachable = unreachable_nodes(graph, &adjacency);
    if !unreachable.is_empty() {
        return Err(ValidationError::UnreachableNodes { ids: unreachable });
    }

    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Report condition nodes missing a "true" or "false" branch
pub fn lint(graph: &FlowGraph) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for node in graph.nodes.iter().filter(|n| n.kind() == Some(NodeKind::Condition)) {
        let branches: Vec<bool> = graph.outgoing(&node.id).filter_map(|e| e.branch()).collect();
        for branch in [true, false] {
            if !branches.contains(&branch) {
                warnings.push(ValidationWarning::MissingBranch {
                    node_id: node.id.clone(),
                    branch,
                });
            }
        }
    }

    warnings
}

/// Successors per node, restricted to edges whose endpoints both exist
fn adjacency(graph: &FlowGraph) -> HashMap<&str, Vec<&str>> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in &graph.edges {
        if ids.contains(edge.source.as_str()) && ids.contains(edge.target.as_str()) {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    adjacency
}

fn has_cycle(graph: &FlowGraph, adjacency: &HashMap<&str, Vec<&str>>) -> bool {
    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if on_stack.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }

        on_stack.insert(node);
        let found = adjacency
            .get(node)
            .into_iter()
            .flatten()
            .any(|&next| visit(next, adjacency, visited, on_stack));
        on_stack.remove(node);
        found
    }

    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    graph
        .nodes
        .iter()
        .any(|n| visit(n.id.as_str(), adjacency, &mut visited, &mut on_stack))
}

fn unreachable_nodes(graph: &FlowGraph, adjacency: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = graph.triggers().map(|n| n.id.as_str()).collect();

    while let Some(node) = stack.pop() {
        if reached.insert(node) {
            if let Some(next) = adjacency.get(node) {
                stack.extend(next.iter().copied());
            }
        }
    }

    graph
        .nodes
        .iter()
        .filter(|n| !reached.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Node};
    use serde_json::json;

    fn trigger(id: &str) -> Node {
        Node::trigger(id, Some("d1"), Some("ping"))
    }

    fn action(id: &str) -> Node {
        Node::action(id, "d2", "turnOn", json!({}))
    }

    fn condition(id: &str) -> Node {
        Node::condition(id, json!({"==": [1, 1]}))
    }

    #[test]
    fn test_valid_linear_graph() {
        let graph = FlowGraph::new(
            vec![trigger("t"), condition("c"), action("a")],
            vec![Edge::new("e1", "t", "c"), Edge::labeled("e2", "c", "a", "true")],
        );
        assert_eq!(validate(&graph), Ok(()));
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(validate(&FlowGraph::default()), Err(ValidationError::EmptyGraph));

        // Missing trigger wins over missing action
        let only_condition = FlowGraph::new(vec![condition("c")], vec![]);
        assert_eq!(validate(&only_condition), Err(ValidationError::NoTrigger));

        let no_action = FlowGraph::new(vec![trigger("t")], vec![]);
        assert_eq!(validate(&no_action), Err(ValidationError::NoAction));

        // A cycle is reported before unreachable nodes
        let both = FlowGraph::new(
            vec![trigger("t"), action("a"), action("b"), action("orphan")],
            vec![
                Edge::new("e1", "t", "a"),
                Edge::new("e2", "a", "b"),
                Edge::new("e3", "b", "a"),
            ],
        );
        assert_eq!(validate(&both), Err(ValidationError::CycleDetected));
    }

    #[test]
    fn test_cycle_detected_regardless_of_order() {
        let nodes = vec![trigger("t"), action("a"), action("b"), action("c")];
        let edges = vec![
            Edge::new("e1", "t", "a"),
            Edge::new("e2", "a", "b"),
            Edge::new("e3", "b", "c"),
            Edge::new("e4", "c", "a"),
        ];

        let forward = FlowGraph::new(nodes.clone(), edges.clone());
        let mut rev_nodes = nodes;
        rev_nodes.reverse();
        let mut rev_edges = edges;
        rev_edges.reverse();
        let backward = FlowGraph::new(rev_nodes, rev_edges);

        assert_eq!(validate(&forward), Err(ValidationError::CycleDetected));
        assert_eq!(validate(&backward), Err(ValidationError::CycleDetected));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let graph = FlowGraph::new(
            vec![trigger("t"), action("a")],
            vec![Edge::new("e1", "t", "a"), Edge::new("e2", "a", "a")],
        );
        assert_eq!(validate(&graph), Err(ValidationError::CycleDetected));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let graph = FlowGraph::new(
            vec![trigger("t"), action("a"), action("b"), action("join")],
            vec![
                Edge::new("e1", "t", "a"),
                Edge::new("e2", "t", "b"),
                Edge::new("e3", "a", "join"),
                Edge::new("e4", "b", "join"),
            ],
        );
        assert_eq!(validate(&graph), Ok(()));
    }

    #[test]
    fn test_unreachable_nodes_named_exactly() {
        let graph = FlowGraph::new(
            vec![
                trigger("t"),
                action("a"),
                action("lost1"),
                condition("lost2"),
            ],
            vec![Edge::new("e1", "t", "a"), Edge::new("e2", "lost2", "lost1")],
        );
        assert_eq!(
            validate(&graph),
            Err(ValidationError::UnreachableNodes {
                ids: vec!["lost1".to_string(), "lost2".to_string()]
            })
        );
    }

    #[test]
    fn test_multiple_triggers_reach_everything() {
        let graph = FlowGraph::new(
            vec![trigger("t1"), trigger("t2"), action("a1"), action("a2")],
            vec![Edge::new("e1", "t1", "a1"), Edge::new("e2", "t2", "a2")],
        );
        assert_eq!(validate(&graph), Ok(()));
    }

    #[test]
    fn test_structural_checks() {
        let dup = FlowGraph::new(
            vec![trigger("t"), action("a"), action("a")],
            vec![Edge::new("e1", "t", "a")],
        );
        assert_eq!(
            validate(&dup),
            Err(ValidationError::DuplicateNodeId("a".to_string()))
        );

        let dangling = FlowGraph::new(
            vec![trigger("t"), action("a")],
            vec![Edge::new("e1", "t", "a"), Edge::new("e2", "a", "ghost")],
        );
        assert_eq!(
            validate(&dangling),
            Err(ValidationError::DanglingEdge {
                edge_id: "e2".to_string(),
                node_id: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_lint_missing_branch() {
        let graph = FlowGraph::new(
            vec![trigger("t"), condition("c"), action("a")],
            vec![Edge::new("e1", "t", "c"), Edge::labeled("e2", "c", "a", "yes")],
        );
        assert_eq!(
            lint(&graph),
            vec![ValidationWarning::MissingBranch {
                node_id: "c".to_string(),
                branch: false
            }]
        );

        let complete = FlowGraph::new(
            vec![trigger("t"), condition("c"), action("a"), action("b")],
            vec![
                Edge::new("e1", "t", "c"),
                Edge::labeled("e2", "c", "a", "true"),
                Edge::labeled("e3", "c", "b", "no"),
            ],
        );
        assert!(lint(&complete).is_empty());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::UnreachableNodes {
            ids: vec!["x".to_string(), "y".to_string()],
        };
        assert_eq!(err.to_string(), "Nodes not reachable from any trigger: x, y");
    }
}
