use serde::{Deserialize, Serialize};

use guild_core::types::{AgentSpec, ConditionType, NodeId, RequirementId};

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// Human-readable label shown on the canvas.
    #[serde(default)]
    pub label: String,
    /// What the node does when the simulator reaches it.
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs an agent through the executor.
    Agent(AgentNode),
    /// Picks exactly one of two outgoing branches.
    Condition(ConditionNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub agent: AgentSpec,
    /// Credentials this agent cannot run without.
    #[serde(default)]
    pub credentials: Vec<RequirementId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    /// Expression text, interpreted according to `condition_type`.
    pub condition: String,
    #[serde(default)]
    pub condition_type: ConditionType,
    #[serde(default)]
    pub description: String,
}

impl Node {
    /// Create an agent node labelled with the agent's name.
    pub fn agent(id: impl Into<NodeId>, agent: AgentSpec) -> Self {
        Self {
            id: id.into(),
            label: agent.name.clone(),
            kind: NodeKind::Agent(AgentNode {
                agent,
                credentials: vec![],
            }),
        }
    }

    /// Create an `if` condition node.
    pub fn condition(id: impl Into<NodeId>, condition: impl Into<String>) -> Self {
        Self::condition_of(id, ConditionType::If, condition)
    }

    pub fn condition_of(
        id: impl Into<NodeId>,
        condition_type: ConditionType,
        condition: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.to_string(),
            id,
            kind: NodeKind::Condition(ConditionNode {
                condition: condition.into(),
                condition_type,
                description: String::new(),
            }),
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the credentials an agent node requires. No effect on condition nodes.
    pub fn with_credentials(mut self, ids: &[&str]) -> Self {
        if let NodeKind::Agent(agent) = &mut self.kind {
            agent.credentials = ids.iter().map(|id| RequirementId::new(*id)).collect();
        }
        self
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, NodeKind::Condition(_))
    }

    pub fn as_agent(&self) -> Option<&AgentNode> {
        match &self.kind {
            NodeKind::Agent(agent) => Some(agent),
            NodeKind::Condition(_) => None,
        }
    }

    pub fn as_condition(&self) -> Option<&ConditionNode> {
        match &self.kind {
            NodeKind::Condition(cond) => Some(cond),
            NodeKind::Agent(_) => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Agent(_) => "agent",
            NodeKind::Condition(_) => "condition",
        }
    }
}
