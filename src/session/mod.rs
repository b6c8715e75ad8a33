//! Orchestration session: per-action state machine driving deploy and mint

mod engine;
mod state;

pub use engine::{MintRequest, OrchestrationSession};
pub use state::{ActionFailure, ActionKind, SessionState, SlotState};
