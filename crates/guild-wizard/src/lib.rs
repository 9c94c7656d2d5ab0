//! The Guild setup wizard: a gated step machine over a single session
//! aggregate that renderers observe through the event bus.

pub mod machine;
pub mod session;

pub use machine::{exit_guard, GuardView, WizardStateMachine};
pub use session::WizardSession;
