use futures::future::BoxFuture;

use crate::context::ValueEnvironment;
use crate::error::{ExecutorError, Result};
use crate::types::{AgentOutput, AgentSpec, Blueprint, SimulationResult};

/// Agent executor: runs one agent node during a simulation.
///
/// Invoked once per executed agent node per run, with the context
/// accumulated from the nodes upstream of it.
pub trait AgentExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        agent: AgentSpec,
        context: ValueEnvironment,
    ) -> BoxFuture<'_, std::result::Result<AgentOutput, ExecutorError>>;
}

/// Blueprint supplier: turns user intent text into a Blueprint.
pub trait BlueprintSupplier: Send + Sync + 'static {
    fn generate(&self, intent: String) -> BoxFuture<'_, Result<Blueprint>>;
}

/// Deployer: publishes a simulated Guild once the wizard reaches deployment.
pub trait Deployer: Send + Sync + 'static {
    /// Returns a deployment identifier.
    fn deploy(&self, blueprint: Blueprint, result: SimulationResult) -> BoxFuture<'_, Result<String>>;
}
