use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A step of the Guild setup wizard.
///
/// The declaration order is the default forward path.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Intent,
    Canvas,
    Credentials,
    Simulation,
    Deployment,
}

impl StepId {
    /// All steps in forward order.
    pub const ALL: [StepId; 5] = [
        StepId::Intent,
        StepId::Canvas,
        StepId::Credentials,
        StepId::Simulation,
        StepId::Deployment,
    ];

    /// The step after this one on the forward path.
    pub fn next(self) -> Option<StepId> {
        match self {
            Self::Intent => Some(Self::Canvas),
            Self::Canvas => Some(Self::Credentials),
            Self::Credentials => Some(Self::Simulation),
            Self::Simulation => Some(Self::Deployment),
            Self::Deployment => None,
        }
    }

    /// The step before this one on the forward path.
    pub fn previous(self) -> Option<StepId> {
        match self {
            Self::Intent => None,
            Self::Canvas => Some(Self::Intent),
            Self::Credentials => Some(Self::Canvas),
            Self::Simulation => Some(Self::Credentials),
            Self::Deployment => Some(Self::Simulation),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Canvas => "canvas",
            Self::Credentials => "credentials",
            Self::Simulation => "simulation",
            Self::Deployment => "deployment",
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intent" => Ok(Self::Intent),
            "canvas" => Ok(Self::Canvas),
            "credentials" => Ok(Self::Credentials),
            "simulation" => Ok(Self::Simulation),
            "deployment" => Ok(Self::Deployment),
            other => Err(format!("unknown step: {other}")),
        }
    }
}

/// Stable identifier of a node in a workflow graph.
///
/// Ordering is lexical; the simulator breaks topological ties with it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a credential requirement (e.g. `stripe_api_key`).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequirementId(pub String);

impl RequirementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequirementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequirementId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequirementId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier of a single simulation run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An agent suggested by the blueprint supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// External tools the agent talks to ("Stripe API", "Slack API", ...).
    #[serde(default)]
    pub tools_needed: Vec<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            description: String::new(),
            tools_needed: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_needed = tools;
        self
    }
}

/// A workflow suggested alongside the agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `webhook`, `schedule`, `event`, `manual`.
    #[serde(default)]
    pub trigger_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedStructure {
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,
}

/// Output of the blueprint supplier. Immutable once set on a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub guild_purpose: String,
    pub suggested_structure: SuggestedStructure,
}

impl Blueprint {
    pub fn agents(&self) -> &[AgentSpec] {
        &self.suggested_structure.agents
    }
}

/// The interpretation applied to a condition node's expression text.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    #[default]
    If,
    Switch,
    Filter,
    Gate,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::If => "if",
            Self::Switch => "switch",
            Self::Filter => "filter",
            Self::Gate => "gate",
        })
    }
}

/// Lifecycle of a condition node during evaluation.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionStatus {
    #[default]
    Ready,
    Evaluating,
    True,
    False,
    Error,
}

impl ConditionStatus {
    /// Whether the status is an end state of one evaluation.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::True | Self::False | Self::Error)
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Evaluating => "evaluating",
            Self::True => "true",
            Self::False => "false",
            Self::Error => "error",
        })
    }
}

/// One of the two outgoing ports of a condition node.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl Branch {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
        }
    }

    pub fn status(&self) -> ConditionStatus {
        match self {
            Self::True => ConditionStatus::True,
            Self::False => ConditionStatus::False,
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent executor hands back for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub response: String,
    #[serde(default)]
    pub thought_process: Vec<String>,
    /// Values merged into the run context for downstream nodes.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

impl AgentOutput {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    pub fn with_thoughts(mut self, thoughts: Vec<String>) -> Self {
        self.thought_process = thoughts;
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }
}

/// Result of one agent node in a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub node_id: NodeId,
    pub agent_name: String,
    /// Seconds spent inside the executor.
    pub execution_time: f64,
    pub response: String,
    pub thought_process: Vec<String>,
    #[serde(default = "default_succeeded")]
    pub succeeded: bool,
}

fn default_succeeded() -> bool {
    true
}

/// Outcome of a whole simulation run. Only ever published complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub run_id: RunId,
    /// Total wall-clock seconds for the run.
    pub execution_time: f64,
    /// Agent results in deterministic topological order.
    pub agent_results: Vec<AgentResult>,
    pub insights: Vec<String>,
}

impl SimulationResult {
    /// True when no agent node in the run failed.
    pub fn all_succeeded(&self) -> bool {
        self.agent_results.iter().all(|r| r.succeeded)
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agent_results
            .iter()
            .map(|r| r.agent_name.as_str())
            .collect()
    }
}

/// Transient progress of an in-flight run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Nodes currently executing.
    pub current: Vec<NodeId>,
}

impl RunProgress {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_order_follows_forward_path() {
        let mut step = StepId::Intent;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            assert_eq!(next.previous(), Some(step));
            seen.push(next);
            step = next;
        }
        assert_eq!(seen, StepId::ALL.to_vec());
        assert!(StepId::Intent < StepId::Deployment);
    }

    #[test]
    fn step_parses_case_insensitively() {
        assert_eq!("Canvas".parse::<StepId>(), Ok(StepId::Canvas));
        assert!("review".parse::<StepId>().is_err());
    }

    #[test]
    fn blueprint_deserializes_from_supplier_json() {
        let json = r#"{
            "guild_name": "Revenue Guild",
            "guild_purpose": "Track MRR",
            "suggested_structure": {
                "agents": [
                    {"name": "Alexander", "role": "Analyst", "tools_needed": ["Stripe API"]}
                ],
                "workflows": [
                    {"name": "Daily report", "trigger_type": "schedule"}
                ]
            }
        }"#;
        let blueprint: Blueprint = serde_json::from_str(json).unwrap();
        assert_eq!(blueprint.agents().len(), 1);
        assert_eq!(blueprint.agents()[0].tools_needed, vec!["Stripe API"]);
        assert!(blueprint.agents()[0].description.is_empty());
        assert_eq!(blueprint.suggested_structure.workflows[0].trigger_type, "schedule");
    }

    #[test]
    fn condition_status_serializes_lowercase() {
        let json = serde_json::to_string(&ConditionStatus::Evaluating).unwrap();
        assert_eq!(json, "\"evaluating\"");
        assert!(ConditionStatus::Error.is_resolved());
        assert!(!ConditionStatus::Ready.is_resolved());
    }

    #[test]
    fn branch_maps_to_status() {
        assert_eq!(Branch::from_bool(true).status(), ConditionStatus::True);
        assert_eq!(Branch::from_bool(false).as_str(), "false");
    }

    #[test]
    fn simulation_result_reports_failures() {
        let mut result = SimulationResult {
            run_id: RunId::new(),
            execution_time: 1.0,
            agent_results: vec![AgentResult {
                node_id: NodeId::from("agent-01"),
                agent_name: "Sophia".into(),
                execution_time: 0.5,
                response: "ok".into(),
                thought_process: vec![],
                succeeded: true,
            }],
            insights: vec![],
        };
        assert!(result.all_succeeded());
        result.agent_results[0].succeeded = false;
        assert!(!result.all_succeeded());
    }
}
