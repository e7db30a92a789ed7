use std::collections::HashSet;

use anyhow::anyhow;
use serde::Serialize;

use crate::error::{LibError, Result};
use crate::models::{GraphEdge, GraphNode};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphIntegrityViolation {
    EmptyNodeId,
    DuplicateNodeId {
        nodeid: String,
    },
    NonFiniteCoordinate {
        nodeid: String,
    },
    UnknownNodeReference {
        from_nodeid: String,
        to_nodeid: String,
        missing_nodeid: String,
    },
}

impl GraphIntegrityViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            GraphIntegrityViolation::EmptyNodeId => "graph_empty_node_id",
            GraphIntegrityViolation::DuplicateNodeId { .. } => "graph_duplicate_node_id",
            GraphIntegrityViolation::NonFiniteCoordinate { .. } => "graph_non_finite_coordinate",
            GraphIntegrityViolation::UnknownNodeReference { .. } => "graph_unknown_node_reference",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            GraphIntegrityViolation::EmptyNodeId => "Node IDs must not be empty",
            GraphIntegrityViolation::DuplicateNodeId { .. } => {
                "Node IDs must be unique within a graph"
            }
            GraphIntegrityViolation::NonFiniteCoordinate { .. } => {
                "Node coordinates must be finite numbers"
            }
            GraphIntegrityViolation::UnknownNodeReference { .. } => {
                "Edge references a node that does not exist"
            }
        }
    }
}

pub fn graph_integrity_violations(
    nodes: &[GraphNode],
    edges: &[GraphEdge],
) -> Vec<GraphIntegrityViolation> {
    let mut violations = Vec::new();
    let mut node_ids: HashSet<&str> = HashSet::with_capacity(nodes.len());

    for node in nodes {
        if node.nodeid.trim().is_empty() {
            violations.push(GraphIntegrityViolation::EmptyNodeId);
            continue;
        }
        if !node_ids.insert(node.nodeid.as_str()) {
            violations.push(GraphIntegrityViolation::DuplicateNodeId {
                nodeid: node.nodeid.clone(),
            });
        }
        if !node.x.is_finite() || !node.y.is_finite() {
            violations.push(GraphIntegrityViolation::NonFiniteCoordinate {
                nodeid: node.nodeid.clone(),
            });
        }
    }

    for edge in edges {
        // Report the first missing endpoint only; one violation per edge.
        let missing = if !node_ids.contains(edge.from_nodeid.as_str()) {
            Some(&edge.from_nodeid)
        } else if !node_ids.contains(edge.to_nodeid.as_str()) {
            Some(&edge.to_nodeid)
        } else {
            None
        };

        if let Some(missing) = missing {
            violations.push(GraphIntegrityViolation::UnknownNodeReference {
                from_nodeid: edge.from_nodeid.clone(),
                to_nodeid: edge.to_nodeid.clone(),
                missing_nodeid: missing.clone(),
            });
        }
    }

    violations
}

pub fn ensure_graph_integrity(nodes: &[GraphNode], edges: &[GraphEdge]) -> Result<()> {
    let violations = graph_integrity_violations(nodes, edges);
    if let Some(first) = violations.first() {
        return Err(LibError::invalid_with_code(
            first.error_code(),
            first.public_message(),
            anyhow!("graph integrity validation failed: {:?}", violations),
        ));
    }

    Ok(())
}
