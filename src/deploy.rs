use futures::future::BoxFuture;
use tracing::info;

use guild_core::error::{GuildError, Result};
use guild_core::traits::Deployer;
use guild_core::types::{Blueprint, SimulationResult};

/// Deployer that only mints a deployment id; nothing leaves the machine.
#[derive(Debug, Default, Clone)]
pub struct DryRunDeployer;

impl Deployer for DryRunDeployer {
    fn deploy(&self, blueprint: Blueprint, result: SimulationResult) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if !result.all_succeeded() {
                return Err(GuildError::Deploy("simulation has failed agents".into()));
            }
            let slug: String = blueprint
                .guild_name
                .to_lowercase()
                .split(|c: char| !c.is_ascii_alphanumeric())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("-");
            let id = format!("{}-{}", slug, chrono::Utc::now().format("%Y%m%d%H%M%S"));
            info!(deployment = %id, agents = result.agent_results.len(), "Dry-run deployment");
            Ok(id)
        })
    }
}
