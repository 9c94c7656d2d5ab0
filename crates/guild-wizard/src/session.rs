use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use guild_core::config::{AppConfig, CredentialRequirement};
use guild_core::context::ValueEnvironment;
use guild_core::error::{GraphError, GuildError, Result, SimulationError, WizardError};
use guild_core::event::{EventBus, SessionEvent};
use guild_core::traits::{AgentExecutor, BlueprintSupplier, Deployer};
use guild_core::types::{
    Blueprint, NodeId, RequirementId, RunId, RunProgress, SimulationResult, StepId,
};
use guild_engine::condition::{ConditionBoard, ConditionEvaluator, ConditionNodeState, Decision};
use guild_engine::credentials::CredentialStore;
use guild_engine::graph::WorkflowGraph;
use guild_engine::simulation::{RunHandle, SimulationRunner};

use crate::machine::{GuardView, WizardStateMachine};

/// A run started by the session, with the input revision it was started on.
struct ActiveRun {
    handle: RunHandle,
    revision: u64,
}

/// The root aggregate of one wizard session.
///
/// Owns the current step, the blueprint, the workflow graph, the credential
/// values, the latest simulation result and the error list. Every change is
/// published on the session's event bus; renderers subscribe and never
/// mutate the session directly.
pub struct WizardSession {
    machine: WizardStateMachine,
    blueprint: Option<Blueprint>,
    graph: Option<WorkflowGraph>,
    credentials: CredentialStore,
    catalog: Vec<CredentialRequirement>,
    latest_result: Option<SimulationResult>,
    errors: Vec<String>,
    event_bus: Arc<EventBus>,
    evaluator: ConditionEvaluator,
    runner: SimulationRunner,
    active_run: Option<ActiveRun>,
    /// Bumped by every graph or credential edit.
    revision: u64,
}

impl WizardSession {
    pub fn new(config: &AppConfig, executor: Arc<dyn AgentExecutor>) -> Self {
        let event_bus = Arc::new(EventBus::new(config.events.capacity));
        let evaluator = ConditionEvaluator::new(ConditionBoard::new(event_bus.clone()));
        let runner = SimulationRunner::new(
            executor,
            config.simulation.clone(),
            event_bus.clone(),
            evaluator.clone(),
        );
        let catalog = config.requirements();

        Self {
            machine: WizardStateMachine::new(),
            blueprint: None,
            graph: None,
            credentials: CredentialStore::with_requirements(catalog.clone()),
            catalog,
            latest_result: None,
            errors: vec![],
            event_bus,
            evaluator,
            runner,
            active_run: None,
            revision: 0,
        }
    }

    // ── Read side ──────────────────────────────────────────────

    pub fn current_step(&self) -> StepId {
        self.machine.current()
    }

    pub fn blueprint(&self) -> Option<&Blueprint> {
        self.blueprint.as_ref()
    }

    pub fn graph(&self) -> Option<&WorkflowGraph> {
        self.graph.as_ref()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn latest_result(&self) -> Option<&SimulationResult> {
        self.latest_result.as_ref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_bus.subscribe()
    }

    /// Requirements referenced by the current graph, in id order.
    pub fn required_credentials(&self) -> Vec<&CredentialRequirement> {
        let Some(graph) = &self.graph else {
            return vec![];
        };
        graph
            .required_credentials()
            .iter()
            .filter_map(|id| self.credentials.requirement(id))
            .collect()
    }

    /// Requirement ids referenced by the graph that lack a valid value.
    pub fn missing_credentials(&self) -> Vec<RequirementId> {
        match &self.graph {
            Some(graph) => self.credentials.missing_for(&graph.required_credentials()),
            None => vec![],
        }
    }

    /// Status and definition of a condition node, for drawing.
    pub fn condition_state(&self, node_id: &NodeId) -> Option<ConditionNodeState> {
        self.evaluator.board().state(self.graph.as_ref()?, node_id)
    }

    // ── Commands ───────────────────────────────────────────────

    /// Attach a blueprint. Only possible while on the intent step; replaces
    /// any earlier blueprint together with the graph laid out from it.
    pub fn set_blueprint(&mut self, blueprint: Blueprint) -> Result<()> {
        self.require_step(StepId::Intent)?;
        info!(
            guild = %blueprint.guild_name,
            agents = blueprint.agents().len(),
            "Blueprint set"
        );
        self.event_bus.publish(SessionEvent::BlueprintSet {
            guild_name: blueprint.guild_name.clone(),
            agents: blueprint.agents().len(),
        });
        self.blueprint = Some(blueprint);
        if self.graph.take().is_some() {
            self.graph_changed();
        }
        Ok(())
    }

    /// Ask the supplier for a blueprint and attach it.
    pub async fn generate_blueprint(
        &mut self,
        supplier: &dyn BlueprintSupplier,
        intent: &str,
    ) -> Result<&Blueprint> {
        self.require_step(StepId::Intent)?;
        let blueprint = supplier.generate(intent.to_string()).await.map_err(|e| {
            self.record_error(format!("Blueprint generation failed: {e}"));
            e
        })?;
        self.set_blueprint(blueprint)?;
        self.blueprint
            .as_ref()
            .ok_or_else(|| GuildError::Blueprint("blueprint was not stored".into()))
    }

    /// Move to `target`. Forward moves check the exit guard of every step
    /// left behind; a refused move changes nothing but the error list.
    ///
    /// Entering the canvas lays out a graph from the blueprint when the
    /// session has none yet.
    pub fn advance_step(&mut self, target: StepId) -> std::result::Result<(), WizardError> {
        let from = self.machine.current();
        let seeded = match (&self.graph, &self.blueprint) {
            (None, Some(blueprint)) if target > StepId::Intent => {
                Some(WorkflowGraph::from_blueprint(blueprint, &self.catalog))
            }
            _ => None,
        };

        let view = GuardView {
            blueprint: self.blueprint.as_ref(),
            graph: self.graph.as_ref().or(seeded.as_ref()),
            credentials: &self.credentials,
            latest_result: self.latest_result.as_ref(),
        };
        if let Err(e) = self.machine.advance(target, &view) {
            warn!(from = %from, to = %target, reason = %e, "Step transition blocked");
            self.event_bus.publish(SessionEvent::TransitionBlocked {
                from,
                to: target,
                reason: e.to_string(),
            });
            self.record_error(e.to_string());
            return Err(e);
        }

        if let Some(graph) = seeded {
            self.graph = Some(graph);
            self.graph_changed();
        }
        if from != target {
            info!(from = %from, to = %target, "Wizard step changed");
            self.event_bus
                .publish(SessionEvent::StepChanged { from, to: target });
        }
        Ok(())
    }

    /// Move one step along the default forward path.
    pub fn next_step(&mut self) -> std::result::Result<(), WizardError> {
        match self.machine.current().next() {
            Some(next) => self.advance_step(next),
            None => Ok(()),
        }
    }

    /// Move one step back. Entered data is kept.
    pub fn previous_step(&mut self) {
        if let Some(previous) = self.machine.current().previous() {
            // Backward moves have no guard to fail.
            let _ = self.advance_step(previous);
        }
    }

    /// Apply an edit to the workflow graph.
    ///
    /// The edit runs against a copy and is committed only if it succeeds, so
    /// a failing edit leaves the graph as it was.
    pub fn edit_graph<T>(
        &mut self,
        edit: impl FnOnce(&mut WorkflowGraph) -> std::result::Result<T, GraphError>,
    ) -> Result<T> {
        let mut draft = self.graph.clone().unwrap_or_default();
        let value = edit(&mut draft).map_err(|e| {
            self.record_error(format!("Graph edit rejected: {e}"));
            e
        })?;
        self.graph = Some(draft);
        self.graph_changed();
        Ok(value)
    }

    /// Replace the workflow graph wholesale (e.g. an imported document).
    pub fn replace_graph(&mut self, graph: WorkflowGraph) {
        self.graph = Some(graph);
        self.graph_changed();
    }

    /// Enter or edit a credential value. Returns whether it is valid.
    pub fn edit_credential(&mut self, id: impl Into<RequirementId>, value: impl Into<String>) -> bool {
        let id = id.into();
        let valid = self.credentials.set(id.clone(), value);
        self.revision += 1;
        self.invalidate_result();
        self.event_bus
            .publish(SessionEvent::CredentialUpdated { id, valid });
        valid
    }

    /// Evaluate one condition node against `env` outside of any run.
    pub fn preview_condition(&self, node_id: &NodeId, env: &ValueEnvironment) -> Result<Decision> {
        let node = self
            .graph
            .as_ref()
            .and_then(|g| g.node(node_id))
            .ok_or_else(|| GraphError::UnknownNode(node_id.clone()))?;
        let condition = node
            .as_condition()
            .ok_or_else(|| GuildError::NotACondition(node_id.clone()))?;
        Ok(self.evaluator.evaluate(node_id, condition, env)?)
    }

    /// Start a simulation run of the current graph.
    ///
    /// Clears the previous result. Fails without starting anything when a
    /// run is already in flight, the graph is invalid or a credential is
    /// missing.
    pub fn start_simulation(&mut self, inputs: ValueEnvironment) -> Result<RunId> {
        self.require_step(StepId::Simulation)?;
        if self.is_simulating() {
            return Err(SimulationError::RunAlreadyInProgress.into());
        }

        self.latest_result = None;
        let graph = self.graph.clone().unwrap_or_default();
        let handle = self
            .runner
            .run(&graph, &self.credentials, inputs)
            .map_err(|e| {
                self.record_error(e.to_string());
                e
            })?;
        let run_id = handle.run_id().clone();
        self.active_run = Some(ActiveRun {
            handle,
            revision: self.revision,
        });
        Ok(run_id)
    }

    /// Wait for the active run and publish its result to the session.
    ///
    /// Nothing is published when the run fails, is cancelled, or the graph
    /// or credentials were edited while it ran.
    pub async fn await_simulation(&mut self) -> Result<SimulationResult> {
        let run = self
            .active_run
            .take()
            .ok_or_else(|| SimulationError::Aborted("no simulation run in progress".into()))?;

        let result = match run.handle.wait().await {
            Ok(result) => result,
            Err(e) => {
                self.record_error(e.to_string());
                return Err(e.into());
            }
        };

        if run.revision != self.revision {
            let e = SimulationError::Aborted("graph or credentials changed during the run".into());
            self.record_error(e.to_string());
            return Err(e.into());
        }

        self.errors.clear();
        self.latest_result = Some(result.clone());
        Ok(result)
    }

    /// Start a run and wait for it.
    pub async fn run_simulation(&mut self, inputs: ValueEnvironment) -> Result<SimulationResult> {
        self.start_simulation(inputs)?;
        self.await_simulation().await
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub fn cancel_simulation(&self) -> bool {
        match &self.active_run {
            Some(run) => {
                info!(run_id = %run.handle.run_id(), "Simulation cancellation requested");
                run.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Token that cancels the active run, for callers that cannot hold
    /// the session while it waits (signal handlers, UI threads).
    pub fn simulation_cancel_token(&self) -> Option<CancellationToken> {
        self.active_run.as_ref().map(|run| run.handle.cancel_token())
    }

    pub fn is_simulating(&self) -> bool {
        self.active_run
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    pub fn simulation_progress(&self) -> Option<RunProgress> {
        self.active_run.as_ref().map(|run| run.handle.progress())
    }

    /// Hand the simulated Guild to a deployer. Only on the deployment step.
    pub async fn deploy(&mut self, deployer: &dyn Deployer) -> Result<String> {
        self.require_step(StepId::Deployment)?;
        let blueprint = self
            .blueprint
            .clone()
            .ok_or_else(|| GuildError::Deploy("no blueprint to deploy".into()))?;
        let result = self
            .latest_result
            .clone()
            .ok_or_else(|| GuildError::Deploy("no simulation result".into()))?;

        match deployer.deploy(blueprint, result).await {
            Ok(deployment) => {
                info!(deployment = %deployment, "Guild deployed");
                Ok(deployment)
            }
            Err(e) => {
                self.record_error(e.to_string());
                Err(e)
            }
        }
    }

    // ── Internals ──────────────────────────────────────────────

    fn require_step(&self, expected: StepId) -> std::result::Result<(), WizardError> {
        let actual = self.machine.current();
        if actual == expected {
            Ok(())
        } else {
            Err(WizardError::WrongStep { expected, actual })
        }
    }

    fn graph_changed(&mut self) {
        self.revision += 1;
        self.invalidate_result();
        let (nodes, edges) = match &self.graph {
            Some(graph) => {
                self.evaluator.board().reset(&graph.condition_ids());
                (graph.node_count(), graph.edge_count())
            }
            None => {
                self.evaluator.board().reset(std::iter::empty());
                (0, 0)
            }
        };
        self.event_bus
            .publish(SessionEvent::GraphChanged { nodes, edges });
    }

    fn invalidate_result(&mut self) {
        self.latest_result = None;
    }

    fn record_error(&mut self, message: String) {
        self.errors.push(message);
    }
}

impl std::fmt::Debug for WizardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardSession")
            .field("step", &self.machine.current())
            .field("blueprint", &self.blueprint.as_ref().map(|b| &b.guild_name))
            .field("graph", &self.graph)
            .field("credentials", &self.credentials)
            .field("has_result", &self.latest_result.is_some())
            .field("errors", &self.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guild_core::error::Blocker;
    use guild_core::types::ConditionStatus;
    use guild_engine::graph::{Edge, Node};
    use guild_test_utils::{sample_blueprint, ScriptedExecutor};
    use serde_json::json;

    fn session() -> WizardSession {
        WizardSession::new(&AppConfig::default(), Arc::new(ScriptedExecutor::new()))
    }

    #[test]
    fn test_blueprint_gates_canvas() {
        let mut session = session();
        let err = session.advance_step(StepId::Canvas).unwrap_err();
        assert_eq!(
            err,
            WizardError::GuardNotSatisfied(StepId::Intent, Blocker::MissingBlueprint)
        );
        assert_eq!(session.current_step(), StepId::Intent);
        assert_eq!(session.errors().len(), 1);

        session.set_blueprint(sample_blueprint()).unwrap();
        session.advance_step(StepId::Canvas).unwrap();
        assert_eq!(session.current_step(), StepId::Canvas);
        assert_eq!(session.graph().map(|g| g.node_count()), Some(3));
    }

    #[test]
    fn test_blocked_jump_does_not_seed_graph() {
        let mut session = session();
        session.set_blueprint(sample_blueprint()).unwrap();
        assert!(session.advance_step(StepId::Simulation).is_err());
        assert_eq!(session.current_step(), StepId::Intent);
        assert!(session.graph().is_none());
    }

    #[test]
    fn test_set_blueprint_only_on_intent() {
        let mut session = session();
        session.set_blueprint(sample_blueprint()).unwrap();
        session.advance_step(StepId::Canvas).unwrap();
        assert!(matches!(
            session.set_blueprint(sample_blueprint()),
            Err(GuildError::Wizard(WizardError::WrongStep { .. }))
        ));
    }

    #[test]
    fn test_failed_graph_edit_is_not_committed() {
        let mut session = session();
        session.set_blueprint(sample_blueprint()).unwrap();
        session.advance_step(StepId::Canvas).unwrap();

        let err = session.edit_graph(|g| {
            g.add_node(Node::condition("check", "x > 1"))?;
            g.add_edge(Edge::new("check", "agent-01"))
        });
        assert!(matches!(err, Err(GuildError::Graph(GraphError::InvalidPort { .. }))));
        assert!(session.graph().and_then(|g| g.node(&"check".into())).is_none());
    }

    #[test]
    fn test_preview_condition_updates_status() {
        let mut session = session();
        session
            .edit_graph(|g| g.add_node(Node::condition("check", "mrr > 1000")))
            .unwrap();
        let id = NodeId::from("check");
        assert_eq!(
            session.condition_state(&id).map(|s| s.status),
            Some(ConditionStatus::Ready)
        );

        let env = ValueEnvironment::from_value(json!({ "mrr": 2500 }));
        let decision = session.preview_condition(&id, &env).unwrap();
        assert_eq!(decision.branch.as_str(), "true");
        assert_eq!(
            session.condition_state(&id).map(|s| s.status),
            Some(ConditionStatus::True)
        );

        assert!(matches!(
            session.preview_condition(&"nope".into(), &env),
            Err(GuildError::Graph(GraphError::UnknownNode(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_simulation_requires_step() {
        let mut session = session();
        assert!(matches!(
            session.start_simulation(ValueEnvironment::new()),
            Err(GuildError::Wizard(WizardError::WrongStep { expected: StepId::Simulation, .. }))
        ));
        assert!(!session.cancel_simulation());
    }
}
