pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::ValueEnvironment;
pub use error::{GuildError, Result};
pub use event::{EventBus, SessionEvent};
pub use types::*;
