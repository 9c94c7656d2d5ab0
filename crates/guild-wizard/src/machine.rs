use tracing::debug;

use guild_core::error::{Blocker, WizardError};
use guild_core::types::{Blueprint, NodeId, SimulationResult, StepId};
use guild_engine::credentials::CredentialStore;
use guild_engine::graph::WorkflowGraph;

/// The slice of session state the step guards read.
#[derive(Debug, Clone, Copy)]
pub struct GuardView<'a> {
    pub blueprint: Option<&'a Blueprint>,
    pub graph: Option<&'a WorkflowGraph>,
    pub credentials: &'a CredentialStore,
    pub latest_result: Option<&'a SimulationResult>,
}

/// Exit guard of `step`: what must hold before the wizard may move past it.
pub fn exit_guard(step: StepId, view: &GuardView<'_>) -> Result<(), Blocker> {
    match step {
        StepId::Intent => match view.blueprint {
            Some(_) => Ok(()),
            None => Err(Blocker::MissingBlueprint),
        },
        StepId::Canvas => {
            let graph = view.graph.ok_or(Blocker::MissingGraph)?;
            graph.validate().map_err(Blocker::InvalidGraph)
        }
        StepId::Credentials => {
            let graph = view.graph.ok_or(Blocker::MissingGraph)?;
            let missing = view.credentials.missing_for(&graph.required_credentials());
            if missing.is_empty() {
                Ok(())
            } else {
                Err(Blocker::MissingCredentials(missing))
            }
        }
        StepId::Simulation => {
            let result = view.latest_result.ok_or(Blocker::MissingSimulation)?;
            let failed: Vec<NodeId> = result
                .agent_results
                .iter()
                .filter(|r| !r.succeeded)
                .map(|r| r.node_id.clone())
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(Blocker::FailedSimulation(failed))
            }
        }
        StepId::Deployment => Ok(()),
    }
}

/// Tracks the current wizard step and gates forward moves.
///
/// Moving back is always allowed. Moving forward checks the exit guard of
/// every step being left, in order; the first unmet guard refuses the move
/// and leaves the current step untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardStateMachine {
    current: StepId,
}

impl Default for WizardStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WizardStateMachine {
    pub fn new() -> Self {
        Self {
            current: StepId::Intent,
        }
    }

    pub fn current(&self) -> StepId {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.next().is_none()
    }

    /// Check whether `target` is reachable from the current step without moving.
    pub fn check(&self, target: StepId, view: &GuardView<'_>) -> Result<(), WizardError> {
        let mut step = self.current;
        while step < target {
            exit_guard(step, view).map_err(|blocker| WizardError::GuardNotSatisfied(step, blocker))?;
            match step.next() {
                Some(next) => step = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Move to `target`, returning the step that was left.
    pub fn advance(&mut self, target: StepId, view: &GuardView<'_>) -> Result<StepId, WizardError> {
        self.check(target, view)?;
        let from = self.current;
        self.current = target;
        debug!(from = %from, to = %target, "Wizard step changed");
        Ok(from)
    }

    /// Move one step forward along the default path.
    pub fn forward(&mut self, view: &GuardView<'_>) -> Result<StepId, WizardError> {
        match self.current.next() {
            Some(next) => self.advance(next, view),
            None => Ok(self.current),
        }
    }

    /// Move one step back. Unguarded.
    pub fn back(&mut self) -> StepId {
        let from = self.current;
        if let Some(previous) = from.previous() {
            self.current = previous;
        }
        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guild_core::config::builtin_requirements;
    use guild_core::error::GraphError;
    use guild_core::types::{AgentResult, AgentSpec, RunId, SuggestedStructure};
    use guild_engine::graph::{Edge, Node};

    fn blueprint() -> Blueprint {
        Blueprint {
            guild_name: "Revenue Guild".into(),
            guild_purpose: "Track MRR".into(),
            suggested_structure: SuggestedStructure {
                agents: vec![AgentSpec::new("Alexander", "Analyst").with_tools(vec!["Stripe API".into()])],
                workflows: vec![],
            },
        }
    }

    fn result(succeeded: bool) -> SimulationResult {
        SimulationResult {
            run_id: RunId::new(),
            execution_time: 0.1,
            agent_results: vec![AgentResult {
                node_id: "agent-01".into(),
                agent_name: "Alexander".into(),
                execution_time: 0.1,
                response: "ok".into(),
                thought_process: vec![],
                succeeded,
            }],
            insights: vec![],
        }
    }

    #[test]
    fn blueprint_gates_canvas() {
        let store = CredentialStore::new();
        let mut machine = WizardStateMachine::new();
        let empty = GuardView {
            blueprint: None,
            graph: None,
            credentials: &store,
            latest_result: None,
        };
        let err = machine.advance(StepId::Canvas, &empty).unwrap_err();
        assert_eq!(
            err,
            WizardError::GuardNotSatisfied(StepId::Intent, Blocker::MissingBlueprint)
        );
        assert_eq!(machine.current(), StepId::Intent);

        let bp = blueprint();
        let view = GuardView {
            blueprint: Some(&bp),
            ..empty
        };
        assert_eq!(machine.advance(StepId::Canvas, &view), Ok(StepId::Intent));
        assert_eq!(machine.current(), StepId::Canvas);
    }

    #[test]
    fn invalid_graph_blocks_credentials() {
        let store = CredentialStore::new();
        let bp = blueprint();
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::condition("check", "x > 1")).unwrap();
        graph
            .add_node(Node::agent("yes", AgentSpec::new("Yes", "Tester")))
            .unwrap();
        graph.add_edge(Edge::on_true("check", "yes")).unwrap();

        let mut machine = WizardStateMachine::new();
        let view = GuardView {
            blueprint: Some(&bp),
            graph: Some(&graph),
            credentials: &store,
            latest_result: None,
        };
        machine.advance(StepId::Canvas, &view).unwrap();
        let err = machine.advance(StepId::Credentials, &view).unwrap_err();
        assert!(matches!(
            err.blocker(),
            Some(Blocker::InvalidGraph(GraphError::MissingBranch { .. }))
        ));
        assert_eq!(machine.current(), StepId::Canvas);
    }

    #[test]
    fn credentials_gate_simulation() {
        let bp = blueprint();
        let graph = WorkflowGraph::from_blueprint(&bp, &builtin_requirements());
        let mut store = CredentialStore::with_requirements(builtin_requirements());
        store.set("stripe_api_key", "pk_live_x");

        let mut machine = WizardStateMachine::new();
        let err = {
            let view = GuardView {
                blueprint: Some(&bp),
                graph: Some(&graph),
                credentials: &store,
                latest_result: None,
            };
            machine.advance(StepId::Simulation, &view).unwrap_err()
        };
        assert_eq!(
            err,
            WizardError::GuardNotSatisfied(
                StepId::Credentials,
                Blocker::MissingCredentials(vec!["stripe_api_key".into()])
            )
        );
        assert_eq!(machine.current(), StepId::Intent);

        store.set("stripe_api_key", "sk_test_12345678901234");
        let view = GuardView {
            blueprint: Some(&bp),
            graph: Some(&graph),
            credentials: &store,
            latest_result: None,
        };
        assert!(machine.advance(StepId::Simulation, &view).is_ok());
        assert_eq!(machine.current(), StepId::Simulation);
    }

    #[test]
    fn failed_simulation_blocks_deployment() {
        let bp = blueprint();
        let graph = WorkflowGraph::new();
        let store = CredentialStore::new();
        let failed = result(false);
        let passed = result(true);
        let mut machine = WizardStateMachine::new();

        let mut view = GuardView {
            blueprint: Some(&bp),
            graph: Some(&graph),
            credentials: &store,
            latest_result: None,
        };
        machine.advance(StepId::Simulation, &view).unwrap();
        assert_eq!(
            machine.forward(&view).unwrap_err().blocker(),
            Some(&Blocker::MissingSimulation)
        );

        view.latest_result = Some(&failed);
        assert_eq!(
            machine.forward(&view).unwrap_err().blocker(),
            Some(&Blocker::FailedSimulation(vec!["agent-01".into()]))
        );

        view.latest_result = Some(&passed);
        machine.forward(&view).unwrap();
        assert!(machine.is_terminal());
    }

    #[test]
    fn backward_moves_are_unguarded() {
        let bp = blueprint();
        let graph = WorkflowGraph::new();
        let store = CredentialStore::new();
        let view = GuardView {
            blueprint: Some(&bp),
            graph: Some(&graph),
            credentials: &store,
            latest_result: None,
        };
        let mut machine = WizardStateMachine::new();
        machine.advance(StepId::Simulation, &view).unwrap();

        let nothing = GuardView {
            blueprint: None,
            graph: None,
            credentials: &store,
            latest_result: None,
        };
        assert_eq!(machine.advance(StepId::Credentials, &nothing), Ok(StepId::Simulation));
        assert_eq!(machine.back(), StepId::Credentials);
        assert_eq!(machine.current(), StepId::Canvas);
    }
}
