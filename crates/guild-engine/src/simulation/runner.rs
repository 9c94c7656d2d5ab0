use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use guild_core::config::SimulationConfig;
use guild_core::context::ValueEnvironment;
use guild_core::error::{ExecutorError, SimulationError};
use guild_core::event::{EventBus, SessionEvent};
use guild_core::traits::AgentExecutor;
use guild_core::types::{
    AgentResult, AgentSpec, Branch, NodeId, RunId, RunProgress, SimulationResult,
};

use super::handle::{InFlightGuard, RunHandle};
use super::insights::{self, RunSummary};
use crate::condition::ConditionEvaluator;
use crate::credentials::CredentialStore;
use crate::graph::{NodeKind, WorkflowGraph};

/// Runs workflow graphs against an agent executor, one run at a time.
///
/// Nodes execute in waves: every node whose predecessors have all been
/// resolved is ready. Condition nodes in a wave are evaluated in id order;
/// agent nodes in a wave run concurrently, bounded by `max_concurrency`.
/// Every node in a wave sees the context as it was when the wave began, and
/// outputs are merged back in topological order, so results do not depend on
/// completion order.
pub struct SimulationRunner {
    executor: Arc<dyn AgentExecutor>,
    config: SimulationConfig,
    event_bus: Arc<EventBus>,
    evaluator: ConditionEvaluator,
    in_flight: Arc<AtomicBool>,
}

impl SimulationRunner {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        config: SimulationConfig,
        event_bus: Arc<EventBus>,
        evaluator: ConditionEvaluator,
    ) -> Self {
        Self {
            executor,
            config,
            event_bus,
            evaluator,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Whether a run currently holds the in-flight slot.
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// Graph and credential problems are reported here, before any node
    /// executes. `inputs` are layered over the configured simulation inputs.
    pub fn run(
        &self,
        graph: &WorkflowGraph,
        credentials: &CredentialStore,
        inputs: ValueEnvironment,
    ) -> Result<RunHandle, SimulationError> {
        let guard = InFlightGuard::acquire(&self.in_flight)
            .ok_or(SimulationError::RunAlreadyInProgress)?;

        graph.validate().map_err(SimulationError::InvalidGraph)?;
        let order = graph
            .topological_order()
            .map_err(SimulationError::InvalidGraph)?;

        if let Some(id) = credentials
            .missing_for(&graph.required_credentials())
            .into_iter()
            .next()
        {
            warn!(credential = %id, "Simulation blocked by missing credential");
            return Err(SimulationError::MissingCredential(id));
        }

        self.evaluator.board().reset(&graph.condition_ids());

        let mut context = self.config.inputs.clone();
        context.merge(&inputs);

        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(RunProgress {
            total: order.len(),
            ..RunProgress::default()
        });

        info!(run_id = %run_id, nodes = order.len(), "Simulation started");
        self.event_bus.publish(SessionEvent::SimulationStarted {
            run_id: run_id.clone(),
            nodes: order.len(),
        });

        let execution = Execution {
            run_id: run_id.clone(),
            graph: graph.clone(),
            order,
            inputs: context,
            executor: self.executor.clone(),
            evaluator: self.evaluator.clone(),
            event_bus: self.event_bus.clone(),
            cancel: cancel.clone(),
            progress: progress_tx,
            max_concurrency: self.config.max_concurrency.max(1),
            node_timeout: match self.config.node_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            execution.run().await
        });

        Ok(RunHandle::new(run_id, cancel, progress_rx, task))
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    /// Ran; condition nodes carry the branch they selected.
    Executed(Option<Branch>),
    Skipped,
}

enum AgentOutcome {
    Done {
        result: AgentResult,
        outputs: Map<String, Value>,
    },
    Failed(ExecutorError),
    NotStarted,
}

/// State owned by one spawned run.
struct Execution {
    run_id: RunId,
    graph: WorkflowGraph,
    order: Vec<NodeId>,
    inputs: ValueEnvironment,
    executor: Arc<dyn AgentExecutor>,
    evaluator: ConditionEvaluator,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    progress: watch::Sender<RunProgress>,
    max_concurrency: usize,
    node_timeout: Option<Duration>,
}

impl Execution {
    async fn run(self) -> Result<SimulationResult, SimulationError> {
        let outcome = self.execute().await;
        match &outcome {
            Ok(result) => {
                info!(
                    run_id = %self.run_id,
                    agents = result.agent_results.len(),
                    elapsed_secs = result.execution_time,
                    "Simulation completed"
                );
                self.event_bus.publish(SessionEvent::SimulationCompleted {
                    run_id: self.run_id.clone(),
                    agents: result.agent_results.len(),
                });
            }
            Err(SimulationError::Cancelled) => {
                info!(run_id = %self.run_id, "Simulation cancelled");
                self.event_bus.publish(SessionEvent::SimulationCancelled {
                    run_id: self.run_id.clone(),
                });
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Simulation failed");
                self.event_bus.publish(SessionEvent::SimulationFailed {
                    run_id: self.run_id.clone(),
                    node_id: e.failing_node().cloned(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    async fn execute(&self) -> Result<SimulationResult, SimulationError> {
        let started = Instant::now();
        let mut context = self.inputs.clone();
        let mut resolved: BTreeMap<NodeId, Resolution> = BTreeMap::new();
        // Keyed by topological position so the result order never depends on timing.
        let mut results: BTreeMap<usize, AgentResult> = BTreeMap::new();
        let mut summary = RunSummary {
            agent_nodes: self.graph.nodes().filter(|n| !n.is_condition()).count(),
            ..RunSummary::default()
        };

        while resolved.len() < self.order.len() {
            if self.cancel.is_cancelled() {
                return Err(SimulationError::Cancelled);
            }

            let wave: Vec<(usize, &NodeId)> = self
                .order
                .iter()
                .enumerate()
                .filter(|(_, id)| !resolved.contains_key(*id))
                .filter(|(_, id)| {
                    self.graph
                        .incoming_edges(id)
                        .iter()
                        .all(|e| resolved.contains_key(&e.source))
                })
                .collect();
            if wave.is_empty() {
                return Err(SimulationError::Aborted("no node is ready to run".into()));
            }

            let mut agents: Vec<(usize, NodeId, AgentSpec)> = Vec::new();
            for (index, id) in wave {
                let Some(node) = self.graph.node(id) else {
                    continue;
                };
                if !self.is_active(id, &resolved) {
                    debug!(run_id = %self.run_id, node_id = %id, "Node skipped");
                    resolved.insert(id.clone(), Resolution::Skipped);
                    summary.skipped.push(id.clone());
                    self.progress.send_modify(|p| p.skipped += 1);
                    self.event_bus.publish(SessionEvent::NodeSkipped {
                        run_id: self.run_id.clone(),
                        node_id: id.clone(),
                    });
                    continue;
                }

                match &node.kind {
                    NodeKind::Condition(condition) => {
                        if self.cancel.is_cancelled() {
                            return Err(SimulationError::Cancelled);
                        }
                        let decision = self
                            .evaluator
                            .evaluate(id, condition, &context)
                            .map_err(|error| SimulationError::EvaluationFailed {
                                node: id.clone(),
                                error,
                            })?;
                        resolved.insert(id.clone(), Resolution::Executed(Some(decision.branch)));
                        self.progress.send_modify(|p| p.completed += 1);
                        self.event_bus.publish(SessionEvent::NodeCompleted {
                            run_id: self.run_id.clone(),
                            node_id: id.clone(),
                            branch: Some(decision.branch),
                        });
                        summary
                            .decisions
                            .push((node.label.clone(), decision.branch, decision.detail));
                    }
                    NodeKind::Agent(agent) => {
                        agents.push((index, id.clone(), agent.agent.clone()))
                    }
                }
            }

            if agents.is_empty() {
                continue;
            }

            summary.peak_concurrency = summary
                .peak_concurrency
                .max(agents.len().min(self.max_concurrency));

            // Stops queued agents of this wave once one fails or the run is cancelled.
            let wave_abort = self.cancel.child_token();
            let execution = self;
            let wave_context = &context;
            let wave_token = &wave_abort;
            let outcomes: Vec<(usize, NodeId, AgentOutcome)> = futures::stream::iter(agents)
                .map(move |(index, id, spec)| {
                    let abort = wave_token.clone();
                    let snapshot = wave_context.clone();
                    async move {
                        let outcome = execution.run_agent(&id, spec, snapshot, &abort).await;
                        (index, id, outcome)
                    }
                })
                .buffered(self.max_concurrency)
                .collect()
                .await;

            let mut failure = None;
            let mut interrupted = false;
            for (index, id, outcome) in outcomes {
                match outcome {
                    AgentOutcome::Done { result, outputs } => {
                        context.ingest(&outputs);
                        resolved.insert(id, Resolution::Executed(None));
                        results.insert(index, result);
                    }
                    AgentOutcome::Failed(error) => {
                        if failure.is_none() {
                            failure = Some(SimulationError::AgentFailed {
                                node: id,
                                error,
                            });
                        }
                    }
                    AgentOutcome::NotStarted => interrupted = true,
                }
            }

            if let Some(failure) = failure {
                return Err(failure);
            }
            if interrupted || self.cancel.is_cancelled() {
                return Err(SimulationError::Cancelled);
            }
        }

        let agent_results: Vec<AgentResult> = results.into_values().collect();
        let insights = insights::derive(&agent_results, &summary);
        Ok(SimulationResult {
            run_id: self.run_id.clone(),
            execution_time: started.elapsed().as_secs_f64(),
            agent_results,
            insights,
        })
    }

    /// A node runs if it is a root, or if an executed predecessor leads to it
    /// (through the selected port, for condition predecessors).
    fn is_active(&self, id: &NodeId, resolved: &BTreeMap<NodeId, Resolution>) -> bool {
        let incoming = self.graph.incoming_edges(id);
        incoming.is_empty()
            || incoming.iter().any(|edge| match resolved.get(&edge.source) {
                Some(Resolution::Executed(branch)) => edge.port.is_none() || edge.port == *branch,
                _ => false,
            })
    }

    async fn run_agent(
        &self,
        id: &NodeId,
        spec: AgentSpec,
        context: ValueEnvironment,
        abort: &CancellationToken,
    ) -> AgentOutcome {
        if abort.is_cancelled() {
            return AgentOutcome::NotStarted;
        }

        info!(run_id = %self.run_id, node_id = %id, agent = %spec.name, "Executing agent node");
        self.event_bus.publish(SessionEvent::NodeStarted {
            run_id: self.run_id.clone(),
            node_id: id.clone(),
        });
        self.progress.send_modify(|p| p.current.push(id.clone()));

        let agent_name = spec.name.clone();
        let started = Instant::now();
        let call = self.executor.execute(spec, context);
        let outcome = match self.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutorError::Timeout(limit.as_secs())),
            },
            None => call.await,
        };
        let execution_time = started.elapsed().as_secs_f64();
        self.progress.send_modify(|p| p.current.retain(|current| current != id));

        match outcome {
            Ok(output) => {
                debug!(
                    run_id = %self.run_id,
                    node_id = %id,
                    elapsed_secs = execution_time,
                    "Agent node complete"
                );
                self.progress.send_modify(|p| p.completed += 1);
                self.event_bus.publish(SessionEvent::NodeCompleted {
                    run_id: self.run_id.clone(),
                    node_id: id.clone(),
                    branch: None,
                });
                AgentOutcome::Done {
                    result: AgentResult {
                        node_id: id.clone(),
                        agent_name,
                        execution_time,
                        response: output.response,
                        thought_process: output.thought_process,
                        succeeded: true,
                    },
                    outputs: output.outputs,
                }
            }
            Err(e) => {
                error!(run_id = %self.run_id, node_id = %id, error = %e, "Agent node failed");
                abort.cancel();
                AgentOutcome::Failed(e)
            }
        }
    }
}
