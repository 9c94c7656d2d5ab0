use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;

use guild_core::context::ValueEnvironment;
use guild_core::error::ExecutorError;
use guild_core::traits::AgentExecutor;
use guild_core::types::{AgentOutput, AgentSpec};

/// Deterministic stand-in for the agent service.
///
/// Every agent answers with a templated response and a short thought trail.
/// Each call adds `last_agent` and bumps `agents_completed` in the outputs,
/// so downstream conditions have something to branch on.
#[derive(Debug, Clone)]
pub struct TemplateAgentExecutor {
    latency: Duration,
}

impl TemplateAgentExecutor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for TemplateAgentExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(400))
    }
}

impl AgentExecutor for TemplateAgentExecutor {
    fn execute(
        &self,
        agent: AgentSpec,
        context: ValueEnvironment,
    ) -> BoxFuture<'_, Result<AgentOutput, ExecutorError>> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let completed = context
                .get("agents_completed")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let mut keys: Vec<&str> = context.data().keys().map(String::as_str).collect();
            keys.sort_unstable();

            let mut thoughts = vec![if keys.is_empty() {
                "No upstream context; starting from the task description".to_string()
            } else {
                format!("Reviewed context: {}", keys.join(", "))
            }];
            if !agent.tools_needed.is_empty() {
                thoughts.push(format!("Called {}", agent.tools_needed.join(", ")));
            }
            thoughts.push("Drafted the result".to_string());

            let task = if agent.description.is_empty() {
                "handled the assigned task".to_string()
            } else {
                agent.description.to_lowercase()
            };
            let response = format!("{} ({}) {}", agent.name, agent.role, task);

            Ok(AgentOutput::new(response)
                .with_thoughts(thoughts)
                .with_output("last_agent", json!(agent.name))
                .with_output("agents_completed", json!(completed + 1)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_completed_agents() {
        let executor = TemplateAgentExecutor::new(Duration::ZERO);
        let mut context = ValueEnvironment::new();
        context.set("agents_completed", json!(2));

        let output = executor
            .execute(
                AgentSpec::new("Iris", "Reporter").with_tools(vec!["Slack API".into()]),
                context,
            )
            .await
            .unwrap();

        assert_eq!(output.response, "Iris (Reporter) handled the assigned task");
        assert_eq!(output.outputs["agents_completed"], json!(3));
        assert_eq!(output.thought_process[0], "Reviewed context: agents_completed");
        assert_eq!(output.thought_process[1], "Called Slack API");
    }
}
