use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use guild_core::event::SessionEvent;
use guild_core::types::{ConditionStatus, SimulationResult};
use guild_engine::graph::{NodeKind, WorkflowGraph};

/// Print run and condition events as they arrive until the bus closes.
pub fn spawn_event_printer(mut rx: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{line}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("  ... {n} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// One terminal line per event worth showing while a run is in flight.
fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::SimulationStarted { nodes, .. } => {
            Some(format!("\n  Simulating {nodes} nodes..."))
        }
        SessionEvent::NodeStarted { node_id, .. } => Some(format!("  [..] {node_id}")),
        SessionEvent::NodeCompleted {
            node_id,
            branch: None,
            ..
        } => Some(format!("  [OK] {node_id}")),
        SessionEvent::NodeCompleted {
            node_id,
            branch: Some(branch),
            ..
        } => Some(format!("  [->] {node_id} took the {branch} branch")),
        SessionEvent::NodeSkipped { node_id, .. } => Some(format!("  [--] {node_id} skipped")),
        SessionEvent::ConditionStatusChanged {
            node_id,
            status: ConditionStatus::Error,
        } => Some(format!("  [!!] condition {node_id} failed to evaluate")),
        SessionEvent::SimulationFailed { error, .. } => Some(format!("  [!!] {error}")),
        SessionEvent::SimulationCancelled { .. } => Some("  Simulation cancelled".to_string()),
        _ => None,
    }
}

pub fn print_graph(graph: &WorkflowGraph) {
    println!("  Nodes:");
    for node in graph.nodes() {
        match &node.kind {
            NodeKind::Agent(agent) => {
                let creds = if agent.credentials.is_empty() {
                    String::new()
                } else {
                    let ids: Vec<&str> = agent.credentials.iter().map(|c| c.as_str()).collect();
                    format!("  [needs {}]", ids.join(", "))
                };
                println!("    {:<12} agent      {} ({}){}", node.id, agent.agent.name, agent.agent.role, creds);
            }
            NodeKind::Condition(cond) => {
                println!(
                    "    {:<12} condition  {} `{}`",
                    node.id, cond.condition_type, cond.condition
                );
            }
        }
    }
    println!("  Edges:");
    for edge in graph.edges() {
        match edge.port {
            Some(port) => println!("    {} -[{}]-> {}", edge.source, port, edge.target),
            None => println!("    {} -> {}", edge.source, edge.target),
        }
    }
}

pub fn print_result(result: &SimulationResult) {
    println!();
    println!("  Run {} finished in {:.2}s", result.run_id, result.execution_time);
    for r in &result.agent_results {
        println!();
        println!("  {} [{}] {:.2}s", r.agent_name, r.node_id, r.execution_time);
        println!("    {}", r.response);
        for thought in &r.thought_process {
            println!("      - {thought}");
        }
    }
    if !result.insights.is_empty() {
        println!();
        println!("  Insights:");
        for insight in &result.insights {
            println!("    * {insight}");
        }
    }
}
