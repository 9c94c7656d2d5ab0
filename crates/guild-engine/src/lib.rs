pub mod condition;
pub mod credentials;
pub mod graph;
pub mod simulation;

pub use condition::{ConditionBoard, ConditionEvaluator, ConditionNodeState, Decision};
pub use credentials::CredentialStore;
pub use graph::{Edge, Node, NodeKind, WorkflowGraph};
pub use simulation::{RunHandle, SimulationRunner};
