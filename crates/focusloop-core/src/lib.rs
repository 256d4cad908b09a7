//! # Focusloop Core Library
//!
//! Core logic for the Focusloop focus/break interval timer. All operations
//! are available through this library; the CLI binary is a thin layer over
//! the same API.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A wall-clock-anchored countdown. Remaining time is
//!   always derived from the target timestamp, never accumulated from tick
//!   deltas, so a delayed wakeup can't stretch the countdown.
//! - **Session State Machine**: Sequences the work cycle (warmup → focus →
//!   break), owns session records and crash recovery, and drives the engine
//!   with absolute targets.
//! - **Visibility Coordinator**: Switches the engine between frame-paced and
//!   interval scheduling as the host surface is shown or hidden, with a
//!   drift check on every return to visible.
//! - **Storage**: SQLite-based session persistence and TOML-based
//!   configuration.
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Drift-aware countdown engine
//! - [`SessionStateMachine`]: Work-cycle sequencing and recovery
//! - [`VisibilityCoordinator`]: Scheduling-strategy switching
//! - [`Database`]: Session and timer-state persistence
//! - [`Config`]: Application configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod session;
pub mod storage;
pub mod timer;
pub mod visibility;

pub use clock::{Clock, SystemClock};
pub use error::{ConfigError, CoreError, StoreError};
pub use events::Event;
pub use session::{Phase, SessionConfig, SessionStateMachine, TimerState};
pub use storage::{Config, Database, SessionRecord, TimerStore};
pub use timer::{EngineConfig, SchedulingStrategy, TimerEngine, TimerMode};
pub use visibility::{ManualVisibility, VisibilityCoordinator, VisibilitySource};
