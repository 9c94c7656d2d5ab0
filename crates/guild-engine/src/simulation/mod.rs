//! Simulation runs: execute a validated graph against an agent executor and
//! publish an all-or-nothing result.

mod handle;
mod insights;
mod runner;

pub use handle::RunHandle;
pub use runner::SimulationRunner;
