//! Shared mocks and fixtures for Guild tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use guild_core::context::ValueEnvironment;
use guild_core::error::ExecutorError;
use guild_core::traits::AgentExecutor;
use guild_core::types::{AgentOutput, AgentSpec, Blueprint, SuggestedStructure, WorkflowSpec};
use guild_engine::graph::{Edge, Node, WorkflowGraph};

/// An agent executor that answers from a per-agent script.
///
/// Agents without a scripted response answer with a canned line. Every call
/// is logged with the context it received, before any scripted delay.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: HashMap<String, AgentOutput>,
    failures: HashMap<String, ExecutorError>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, ValueEnvironment)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, agent: &str, output: AgentOutput) -> Self {
        self.responses.insert(agent.to_string(), output);
        self
    }

    pub fn with_failure(mut self, agent: &str, message: &str) -> Self {
        self.failures
            .insert(agent.to_string(), ExecutorError::Failed(message.to_string()));
        self
    }

    pub fn with_delay(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.insert(agent.to_string(), delay);
        self
    }

    /// Agent names in the order they were invoked.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Contexts the given agent was invoked with.
    pub fn contexts(&self, agent: &str) -> Vec<ValueEnvironment> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == agent)
            .map(|(_, ctx)| ctx.clone())
            .collect()
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute(
        &self,
        agent: AgentSpec,
        context: ValueEnvironment,
    ) -> BoxFuture<'_, Result<AgentOutput, ExecutorError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((agent.name.clone(), context));

            if let Some(delay) = self.delays.get(&agent.name) {
                tokio::time::sleep(*delay).await;
            }
            if let Some(error) = self.failures.get(&agent.name) {
                return Err(error.clone());
            }
            Ok(self.responses.get(&agent.name).cloned().unwrap_or_else(|| {
                AgentOutput::new(format!("{} completed the task", agent.name))
                    .with_thoughts(vec![format!("{} reviewed the context", agent.role)])
            }))
        })
    }
}

/// Three agents: a Stripe analyst, a Slack notifier and a tool-less reporter.
pub fn sample_blueprint() -> Blueprint {
    Blueprint {
        guild_name: "Revenue Guild".into(),
        guild_purpose: "Track monthly recurring revenue and alert the team".into(),
        suggested_structure: SuggestedStructure {
            agents: vec![
                AgentSpec::new("Alexander", "Financial Analyst")
                    .with_description("Pulls revenue data")
                    .with_tools(vec!["Stripe API".into()]),
                AgentSpec::new("Sophia", "Notifier")
                    .with_description("Posts updates to the team channel")
                    .with_tools(vec!["Slack API".into()]),
                AgentSpec::new("Marcus", "Reporter").with_description("Writes the summary"),
            ],
            workflows: vec![WorkflowSpec {
                name: "Daily revenue report".into(),
                description: "Runs every morning".into(),
                trigger_type: "schedule".into(),
            }],
        },
    }
}

/// Values that satisfy every built-in credential requirement.
pub fn valid_credentials() -> Vec<(&'static str, &'static str)> {
    vec![
        ("stripe_api_key", "sk_test_12345678901234"),
        (
            "slack_webhook_url",
            "https://hooks.slack.com/services/T000/B000/XXXXXXXX",
        ),
        ("elevenlabs_voice_id", "21m00Tcm4TlvDq8ikWAM"),
    ]
}

/// ```text
/// a-scout -> b-check (score > 50) -true->  c-closer   -> e-reporter
///                                 -false-> d-nurturer -> e-reporter
/// ```
pub fn branching_graph() -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    let agents = [
        ("a-scout", "Scout"),
        ("c-closer", "Closer"),
        ("d-nurturer", "Nurturer"),
        ("e-reporter", "Reporter"),
    ];
    for (id, name) in agents {
        graph
            .add_node(Node::agent(id, AgentSpec::new(name, "Tester")))
            .unwrap();
    }
    graph
        .add_node(Node::condition("b-check", "score > 50").with_label("Hot lead?"))
        .unwrap();

    graph.add_edge(Edge::new("a-scout", "b-check")).unwrap();
    graph.add_edge(Edge::on_true("b-check", "c-closer")).unwrap();
    graph.add_edge(Edge::on_false("b-check", "d-nurturer")).unwrap();
    graph.add_edge(Edge::new("c-closer", "e-reporter")).unwrap();
    graph.add_edge(Edge::new("d-nurturer", "e-reporter")).unwrap();
    graph
}

/// Agents chained in the given order, with ids `agent-01`, `agent-02`, ...
pub fn linear_graph(names: &[&str]) -> WorkflowGraph {
    let mut graph = WorkflowGraph::new();
    let mut previous: Option<String> = None;
    for (index, name) in names.iter().enumerate() {
        let id = format!("agent-{:02}", index + 1);
        graph
            .add_node(Node::agent(id.as_str(), AgentSpec::new(*name, "Tester")))
            .unwrap();
        if let Some(prev) = previous.take() {
            graph.add_edge(Edge::new(prev, id.as_str())).unwrap();
        }
        previous = Some(id);
    }
    graph
}

/// Scout output that routes [`branching_graph`] down the given branch.
pub fn scout_output(hot: bool) -> AgentOutput {
    AgentOutput::new("Lead scored").with_output("score", serde_json::json!(if hot { 80 } else { 20 }))
}
