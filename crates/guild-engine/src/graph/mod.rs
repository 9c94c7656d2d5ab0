//! Workflow graph: the node/edge model the canvas draws and the simulator walks.
//!
//! Nodes live in an arena keyed by their stable `NodeId`; edges are a flat
//! list referring to node ids. Nothing points at anything else directly, so
//! traversal order is a pure function of the arena contents.
//!
//! Invariants enforced on edit:
//! - a condition node has at most one edge per `true`/`false` port, and no
//!   unlabeled edges;
//! - an agent node only has unlabeled outgoing edges.
//!
//! `validate()` re-checks those (a graph imported from JSON never went
//! through the builder), then requires both branches on every condition node,
//! no edges to missing nodes, and no cycles.

pub mod edge;
pub mod node;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use guild_core::config::CredentialRequirement;
use guild_core::error::GraphError;
use guild_core::types::{Blueprint, Branch, NodeId, RequirementId};

pub use edge::Edge;
pub use node::{AgentNode, ConditionNode, Node, NodeKind};

/// Serialized shape of a graph: plain node and edge lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// The workflow graph of a Guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl TryFrom<GraphDocument> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(doc: GraphDocument) -> Result<Self, Self::Error> {
        let mut nodes = BTreeMap::new();
        for node in doc.nodes {
            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }
        // Edges are taken as-is; `validate()` decides whether they make sense.
        Ok(Self {
            nodes,
            edges: doc.edges,
        })
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges,
        }
    }
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lay out a blueprint's agents as a chain, in blueprint order.
    ///
    /// Node ids are `agent-01`, `agent-02`, ...; each node requires the
    /// credentials whose catalog entry covers one of the agent's tools.
    pub fn from_blueprint(blueprint: &Blueprint, catalog: &[CredentialRequirement]) -> Self {
        let mut graph = Self::new();
        let mut previous: Option<NodeId> = None;

        for (index, spec) in blueprint.agents().iter().enumerate() {
            let id = NodeId::new(format!("agent-{:02}", index + 1));
            let mut credentials: Vec<RequirementId> = Vec::new();
            for tool in &spec.tools_needed {
                for req in catalog.iter().filter(|r| r.covers_tool(tool)) {
                    if !credentials.contains(&req.id) {
                        credentials.push(req.id.clone());
                    }
                }
            }
            let mut node = Node::agent(id.clone(), spec.clone());
            if let NodeKind::Agent(agent) = &mut node.kind {
                agent.credentials = credentials;
            }
            graph.nodes.insert(id.clone(), node);

            if let Some(prev) = previous.take() {
                graph.edges.push(Edge::new(prev, id.clone()));
            }
            previous = Some(id);
        }

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Seeded workflow graph from blueprint"
        );
        graph
    }

    /// Add a node. Fails if the id is taken.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add an edge between two existing nodes.
    ///
    /// Adding an identical edge twice is a no-op.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let source = self
            .nodes
            .get(&edge.source)
            .ok_or_else(|| GraphError::UnknownNode(edge.source.clone()))?;
        if !self.nodes.contains_key(&edge.target) {
            return Err(GraphError::UnknownNode(edge.target.clone()));
        }
        if self.edges.contains(&edge) {
            return Ok(());
        }
        check_port(source, &edge, &self.edges)?;
        self.edges.push(edge);
        Ok(())
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        let before = self.edges.len();
        self.edges.retain(|e| &e.source != id && &e.target != id);
        debug!(node_id = %id, removed_edges = before - self.edges.len(), "Removed node");
        Ok(node)
    }

    /// Remove one edge. Returns whether it existed.
    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        let before = self.edges.len();
        self.edges.retain(|e| e != edge);
        before != self.edges.len()
    }

    /// Outgoing edges of a node, optionally limited to one branch port.
    pub fn outgoing_edges(&self, id: &NodeId, port: Option<Branch>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| &e.source == id)
            .filter(|e| port.is_none() || e.port == port)
            .collect()
    }

    /// Incoming edges of a node.
    pub fn incoming_edges(&self, id: &NodeId) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.target == id).collect()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of all condition nodes, in id order.
    pub fn condition_ids(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_condition())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every credential referenced by an agent node.
    pub fn required_credentials(&self) -> BTreeSet<RequirementId> {
        self.nodes
            .values()
            .filter_map(Node::as_agent)
            .flat_map(|a| a.credentials.iter().cloned())
            .collect()
    }

    /// Check that the graph is runnable.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
                return Err(GraphError::Disconnected {
                    source_node: edge.source.clone(),
                    target: edge.target.clone(),
                });
            }
        }

        for (index, edge) in self.edges.iter().enumerate() {
            let source = &self.nodes[&edge.source];
            check_port(source, edge, &self.edges[..index])?;
        }

        for node in self.nodes.values().filter(|n| n.is_condition()) {
            for port in [Branch::True, Branch::False] {
                if self.outgoing_edges(&node.id, Some(port)).is_empty() {
                    return Err(GraphError::MissingBranch {
                        node: node.id.clone(),
                        port,
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm; among ready nodes the smallest id goes first.
    ///
    /// Fails with `CycleDetected` listing the nodes that never became ready.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: BTreeMap<&NodeId, usize> =
            self.nodes.keys().map(|id| (id, 0)).collect();
        for edge in &self.edges {
            if let Some(count) = in_degree.get_mut(&edge.target) {
                *count += 1;
            }
        }

        let mut ready: BTreeSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for edge in self.edges.iter().filter(|e| &e.source == id) {
                if let Some(count) = in_degree.get_mut(&edge.target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(&edge.target);
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck: Vec<NodeId> = in_degree
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(id, _)| id.clone())
                .collect();
            return Err(GraphError::CycleDetected(stuck));
        }
        Ok(order)
    }
}

/// Port rules for an edge leaving `source`, given the edges already present.
fn check_port(source: &Node, edge: &Edge, existing: &[Edge]) -> Result<(), GraphError> {
    let invalid = |reason: &str| GraphError::InvalidPort {
        node: source.id.clone(),
        port: edge.port.map(|p| p.as_str().to_string()),
        reason: reason.to_string(),
    };

    match (&source.kind, edge.port) {
        (NodeKind::Condition(_), None) => {
            Err(invalid("condition edges must leave the true or false port"))
        }
        (NodeKind::Condition(_), Some(port)) => {
            let occupied = existing
                .iter()
                .any(|e| e.source == edge.source && e.port == Some(port));
            if occupied {
                Err(invalid("port already has an edge"))
            } else {
                Ok(())
            }
        }
        (NodeKind::Agent(_), Some(_)) => Err(invalid("agent edges are unlabeled")),
        (NodeKind::Agent(_), None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guild_core::config::builtin_requirements;
    use guild_core::types::{AgentSpec, SuggestedStructure};

    fn agent(id: &str) -> Node {
        Node::agent(id, AgentSpec::new(id.to_uppercase(), "worker"))
    }

    fn branching() -> WorkflowGraph {
        let mut g = WorkflowGraph::new();
        g.add_node(agent("a")).unwrap();
        g.add_node(Node::condition("cond", "value > 10")).unwrap();
        g.add_node(agent("hi")).unwrap();
        g.add_node(agent("lo")).unwrap();
        g.add_edge(Edge::new("a", "cond")).unwrap();
        g.add_edge(Edge::on_true("cond", "hi")).unwrap();
        g.add_edge(Edge::on_false("cond", "lo")).unwrap();
        g
    }

    #[test]
    fn test_graph_construction() {
        let g = branching();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 3);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = WorkflowGraph::new();
        g.add_node(agent("a")).unwrap();
        assert_eq!(
            g.add_node(agent("a")),
            Err(GraphError::DuplicateNode("a".into()))
        );
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let mut g = WorkflowGraph::new();
        g.add_node(agent("a")).unwrap();
        assert_eq!(
            g.add_edge(Edge::new("a", "ghost")),
            Err(GraphError::UnknownNode("ghost".into()))
        );
    }

    #[test]
    fn test_condition_port_rules() {
        let mut g = branching();
        g.add_node(agent("extra")).unwrap();

        let occupied = g.add_edge(Edge::on_true("cond", "extra"));
        assert!(matches!(occupied, Err(GraphError::InvalidPort { .. })));

        let unlabeled = g.add_edge(Edge::new("cond", "extra"));
        assert!(matches!(unlabeled, Err(GraphError::InvalidPort { port: None, .. })));

        let labeled_agent = g.add_edge(Edge::on_true("a", "extra"));
        assert!(matches!(labeled_agent, Err(GraphError::InvalidPort { .. })));

        // Agents may fan out freely.
        g.add_edge(Edge::new("a", "extra")).unwrap();
        assert_eq!(g.outgoing_edges(&"a".into(), None).len(), 2);
    }

    #[test]
    fn test_identical_edge_is_idempotent() {
        let mut g = branching();
        g.add_edge(Edge::new("a", "cond")).unwrap();
        assert_eq!(g.edge_count(), 3);
        g.add_edge(Edge::on_true("cond", "hi")).unwrap();
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn test_outgoing_edges_by_port() {
        let g = branching();
        let cond: NodeId = "cond".into();
        assert_eq!(g.outgoing_edges(&cond, None).len(), 2);
        let t = g.outgoing_edges(&cond, Some(Branch::True));
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].target, NodeId::from("hi"));
    }

    #[test]
    fn test_remove_node_cascades() {
        let mut g = branching();
        g.remove_node(&"cond".into()).unwrap();
        assert_eq!(g.edge_count(), 0);
        assert!(g.remove_node(&"cond".into()).is_err());
    }

    #[test]
    fn test_condition_without_branches_is_invalid() {
        let mut g = WorkflowGraph::new();
        g.add_node(Node::condition("cond", "x")).unwrap();
        assert_eq!(
            g.validate(),
            Err(GraphError::MissingBranch {
                node: "cond".into(),
                port: Branch::True
            })
        );

        let mut agents_only = WorkflowGraph::new();
        agents_only.add_node(agent("a")).unwrap();
        agents_only.add_node(agent("b")).unwrap();
        assert!(agents_only.validate().is_ok());
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = WorkflowGraph::new();
        g.add_node(agent("a")).unwrap();
        g.add_node(agent("b")).unwrap();
        g.add_node(agent("c")).unwrap();
        g.add_edge(Edge::new("a", "b")).unwrap();
        g.add_edge(Edge::new("b", "c")).unwrap();
        g.add_edge(Edge::new("c", "b")).unwrap();
        assert_eq!(
            g.validate(),
            Err(GraphError::CycleDetected(vec!["b".into(), "c".into()]))
        );
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut g = WorkflowGraph::new();
        g.add_node(agent("a")).unwrap();
        g.add_edge(Edge::new("a", "a")).unwrap();
        assert!(matches!(g.validate(), Err(GraphError::CycleDetected(_))));
    }

    #[test]
    fn test_orphan_edge_from_import() {
        let json = r#"{
            "nodes": [{"id": "a", "kind": "agent", "agent": {"name": "A"}}],
            "edges": [{"source": "a", "target": "missing"}]
        }"#;
        let g: WorkflowGraph = serde_json::from_str(json).unwrap();
        assert_eq!(
            g.validate(),
            Err(GraphError::Disconnected {
                source_node: "a".into(),
                target: "missing".into()
            })
        );
    }

    #[test]
    fn test_imported_port_violation() {
        let json = r#"{
            "nodes": [
                {"id": "c", "kind": "condition", "condition": "x > 1"},
                {"id": "t1", "kind": "agent", "agent": {"name": "T1"}},
                {"id": "t2", "kind": "agent", "agent": {"name": "T2"}}
            ],
            "edges": [
                {"source": "c", "port": "true", "target": "t1"},
                {"source": "c", "port": "true", "target": "t2"}
            ]
        }"#;
        let g: WorkflowGraph = serde_json::from_str(json).unwrap();
        assert!(matches!(g.validate(), Err(GraphError::InvalidPort { .. })));
    }

    #[test]
    fn test_import_rejects_duplicate_ids() {
        let json = r#"{
            "nodes": [
                {"id": "a", "kind": "agent", "agent": {"name": "A"}},
                {"id": "a", "kind": "agent", "agent": {"name": "A2"}}
            ]
        }"#;
        assert!(serde_json::from_str::<WorkflowGraph>(json).is_err());
    }

    #[test]
    fn test_export_import() {
        let g = branching();
        let json = serde_json::to_string(&g).unwrap();
        let parsed: WorkflowGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, g);
    }

    #[test]
    fn test_topological_order_breaks_ties_by_id() {
        let mut g = WorkflowGraph::new();
        for id in ["root", "b", "a", "c"] {
            g.add_node(agent(id)).unwrap();
        }
        g.add_edge(Edge::new("root", "c")).unwrap();
        g.add_edge(Edge::new("root", "a")).unwrap();
        g.add_edge(Edge::new("root", "b")).unwrap();
        let order: Vec<String> = g
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|id| id.0)
            .collect();
        assert_eq!(order, vec!["root", "a", "b", "c"]);
    }

    #[test]
    fn test_from_blueprint_chains_agents() {
        let blueprint = Blueprint {
            guild_name: "Finance".into(),
            guild_purpose: String::new(),
            suggested_structure: SuggestedStructure {
                agents: vec![
                    AgentSpec::new("Alexander", "Analyst")
                        .with_tools(vec!["Stripe API".into(), "QuickBooks API".into()]),
                    AgentSpec::new("Victoria", "Compliance").with_tools(vec!["Slack API".into()]),
                ],
                workflows: vec![],
            },
        };
        let g = WorkflowGraph::from_blueprint(&blueprint, &builtin_requirements());
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edges(), &[Edge::new("agent-01", "agent-02")]);
        let first = g.node(&"agent-01".into()).unwrap().as_agent().unwrap();
        assert_eq!(first.credentials, vec![RequirementId::new("stripe_api_key")]);
        let required: Vec<String> = g
            .required_credentials()
            .into_iter()
            .map(|r| r.0)
            .collect();
        assert_eq!(required, vec!["slack_webhook_url", "stripe_api_key"]);
        assert!(g.validate().is_ok());
    }
}
