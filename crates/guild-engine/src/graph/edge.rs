use serde::{Deserialize, Serialize};

use guild_core::types::{Branch, NodeId};

/// A directed connection between two nodes.
///
/// Edges leaving a condition node carry the branch port they hang off;
/// edges leaving an agent node are unlabeled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub source: NodeId,
    /// Branch port on the source, for condition nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Branch>,
    /// Target node id.
    pub target: NodeId,
}

impl Edge {
    /// Create an unlabeled edge.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            port: None,
            target: target.into(),
        }
    }

    /// Create an edge leaving a condition node's `true` or `false` port.
    pub fn branch(source: impl Into<NodeId>, port: Branch, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            port: Some(port),
            target: target.into(),
        }
    }

    pub fn on_true(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::branch(source, Branch::True, target)
    }

    pub fn on_false(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::branch(source, Branch::False, target)
    }

    /// Parse a port name from the canvas (`"true"`, `"false"`, or empty).
    pub fn parse_port(port: &str) -> Option<Option<Branch>> {
        match port.trim() {
            "" => Some(None),
            "true" => Some(Some(Branch::True)),
            "false" => Some(Some(Branch::False)),
            _ => None,
        }
    }
}
