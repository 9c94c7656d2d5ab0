use crate::types::{Branch, ConditionStatus, NodeId, RequirementId, RunId, StepId};

/// Session state change broadcast to every subscriber (renderers, loggers).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The wizard moved to another step.
    StepChanged { from: StepId, to: StepId },
    /// A forward transition was refused.
    TransitionBlocked { from: StepId, to: StepId, reason: String },
    /// A blueprint was attached to the session.
    BlueprintSet { guild_name: String, agents: usize },
    /// The workflow graph was edited or replaced.
    GraphChanged { nodes: usize, edges: usize },
    /// A credential value was entered or edited. Never carries the secret.
    CredentialUpdated { id: RequirementId, valid: bool },
    /// A condition node changed status.
    ConditionStatusChanged { node_id: NodeId, status: ConditionStatus },
    /// A simulation run started.
    SimulationStarted { run_id: RunId, nodes: usize },
    /// An agent node was handed to the executor.
    NodeStarted { run_id: RunId, node_id: NodeId },
    /// An agent node finished, or a condition node picked a branch.
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        branch: Option<Branch>,
    },
    /// A node was on an unselected branch and did not run.
    NodeSkipped { run_id: RunId, node_id: NodeId },
    /// The run finished and its result was published.
    SimulationCompleted { run_id: RunId, agents: usize },
    /// The run failed; nothing was published.
    SimulationFailed {
        run_id: RunId,
        node_id: Option<NodeId>,
        error: String,
    },
    /// The run was cancelled; nothing was published.
    SimulationCancelled { run_id: RunId },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
