mod machine;
mod state;

pub use machine::{SessionConfig, SessionStateMachine};
pub use state::{Phase, TimerState};
