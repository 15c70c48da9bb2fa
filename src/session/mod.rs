//! Live session orchestration: controller, events, priming, and tool
//! mediation.

pub mod controller;
pub mod events;
pub mod prompt;
pub mod tools;

pub use controller::{SessionController, SessionState};
pub use events::SessionEvent;
pub use tools::{ToolMediator, SAVE_MEMORY_TOOL};
