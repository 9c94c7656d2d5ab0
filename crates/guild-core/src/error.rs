use thiserror::Error;

use crate::types::{Branch, NodeId, RequirementId, StepId};

/// Structural problems with a workflow graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Node already exists: {0}")]
    DuplicateNode(NodeId),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid port {port:?} on node {node}: {reason}")]
    InvalidPort {
        node: NodeId,
        port: Option<String>,
        reason: String,
    },

    #[error("Condition node {node} has no {port} branch")]
    MissingBranch { node: NodeId, port: Branch },

    #[error("Cycle detected through nodes: {}", join_ids(.0))]
    CycleDetected(Vec<NodeId>),

    #[error("Edge {source_node} -> {target} references a node that does not exist")]
    Disconnected { source_node: NodeId, target: NodeId },
}

/// Failure to evaluate a condition expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

/// Failure reported by the external agent executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("Agent execution failed: {0}")]
    Failed(String),

    #[error("Agent timed out after {0}s")]
    Timeout(u64),
}

/// Failures of the simulation run lifecycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("Graph is not runnable: {0}")]
    InvalidGraph(GraphError),

    #[error("Missing or invalid credential: {0}")]
    MissingCredential(RequirementId),

    #[error("A simulation run is already in progress")]
    RunAlreadyInProgress,

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("Agent node {node} failed: {error}")]
    AgentFailed { node: NodeId, error: ExecutorError },

    #[error("Condition node {node} failed: {error}")]
    EvaluationFailed { node: NodeId, error: EvaluationError },

    #[error("Simulation task aborted: {0}")]
    Aborted(String),
}

impl SimulationError {
    /// The node whose failure ended the run, if any.
    pub fn failing_node(&self) -> Option<&NodeId> {
        match self {
            Self::AgentFailed { node, .. } | Self::EvaluationFailed { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// The precondition that keeps the wizard from moving forward.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Blocker {
    #[error("no blueprint has been generated")]
    MissingBlueprint,

    #[error("no workflow graph has been laid out")]
    MissingGraph,

    #[error("workflow graph is invalid: {0}")]
    InvalidGraph(GraphError),

    #[error("credentials missing or invalid: {}", join_ids(.0))]
    MissingCredentials(Vec<RequirementId>),

    #[error("no simulation has completed")]
    MissingSimulation,

    #[error("simulation has failed agent nodes: {}", join_ids(.0))]
    FailedSimulation(Vec<NodeId>),
}

/// Step gating errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WizardError {
    /// The exit guard of the given step is not satisfied.
    #[error("Cannot leave step {0}: {1}")]
    GuardNotSatisfied(StepId, Blocker),

    #[error("Action requires step {expected}, current step is {actual}")]
    WrongStep { expected: StepId, actual: StepId },
}

impl WizardError {
    pub fn blocker(&self) -> Option<&Blocker> {
        match self {
            Self::GuardNotSatisfied(_, blocker) => Some(blocker),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Wizard(#[from] WizardError),

    #[error("Node {0} is not a condition node")]
    NotACondition(NodeId),

    #[error("Blueprint generation failed: {0}")]
    Blueprint(String),

    #[error("Deployment failed: {0}")]
    Deploy(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GuildError>;

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
