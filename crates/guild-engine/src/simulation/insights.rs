use guild_core::types::{AgentResult, Branch, NodeId};

/// What a finished run looked like, gathered while it executed.
#[derive(Debug, Default)]
pub(crate) struct RunSummary {
    pub agent_nodes: usize,
    pub skipped: Vec<NodeId>,
    /// (condition label, chosen branch, detail) in evaluation order.
    pub decisions: Vec<(String, Branch, String)>,
    pub peak_concurrency: usize,
}

/// Deterministic observations about a completed run.
pub(crate) fn derive(results: &[AgentResult], summary: &RunSummary) -> Vec<String> {
    let mut insights = vec![format!(
        "{} of {} agent nodes executed",
        results.len(),
        summary.agent_nodes
    )];

    if !summary.skipped.is_empty() {
        let ids = summary
            .skipped
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        insights.push(format!(
            "{} node(s) skipped on unselected branches: {ids}",
            summary.skipped.len()
        ));
    }

    for (label, branch, detail) in &summary.decisions {
        insights.push(format!("Condition \"{label}\" took the {branch} branch ({detail})"));
    }

    // Ties go to the earlier node so the output is stable across runs.
    let slowest = results.iter().fold(None::<&AgentResult>, |best, r| match best {
        Some(b) if b.execution_time >= r.execution_time => Some(b),
        _ => Some(r),
    });
    if let Some(slowest) = slowest {
        insights.push(format!(
            "Slowest agent: {} ({:.2}s)",
            slowest.agent_name, slowest.execution_time
        ));
    }

    if summary.peak_concurrency > 1 {
        insights.push(format!(
            "Up to {} agents ran concurrently on independent branches",
            summary.peak_concurrency
        ));
    }

    insights
}
