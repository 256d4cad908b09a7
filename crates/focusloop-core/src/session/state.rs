//! Persisted timer state.
//!
//! One `TimerState` record describes the in-flight phase of the work cycle.
//! It is written to the store after every mutation while the mode is not
//! idle, and is what makes a session recoverable after a crash. Remaining
//! time is never part of the record; it is always derived from the target.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::TimerMode;

/// Which of the three mutually exclusive phases the state is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused,
}

/// Full state of the session timer, serializable for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerState {
    pub mode: TimerMode,
    /// When the current phase began (epoch ms).
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    /// When the current phase should end (epoch ms); `None` only when idle.
    #[serde(default)]
    pub target_at_ms: Option<u64>,
    /// Non-null iff the countdown is paused.
    #[serde(default)]
    pub paused_at_ms: Option<u64>,
    /// Links to the externally-owned session record.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// Last time this state was recomputed (epoch ms).
    pub last_update_ms: u64,
    pub is_running: bool,
    pub is_paused: bool,
    /// Mood selected when the session started; compared against the current
    /// mood at focus completion for end-of-session capture.
    #[serde(default)]
    pub mood_start: Option<String>,
}

impl TimerState {
    pub fn idle() -> Self {
        Self {
            mode: TimerMode::Idle,
            started_at_ms: None,
            target_at_ms: None,
            paused_at_ms: None,
            session_id: None,
            last_update_ms: 0,
            is_running: false,
            is_paused: false,
            mood_start: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.is_paused {
            Phase::Paused
        } else if self.is_running {
            Phase::Running
        } else {
            Phase::Idle
        }
    }

    /// Derived remaining time at `now_ms`.
    ///
    /// While paused this is the frozen remaining (`target - paused_at`) —
    /// the snapshot callers read instead of asking the engine, whose
    /// remaining is defined only while running.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        match (self.target_at_ms, self.paused_at_ms) {
            (Some(target), Some(paused_at)) => target.saturating_sub(paused_at),
            (Some(target), None) if self.is_running => target.saturating_sub(now_ms),
            _ => 0,
        }
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self::idle()
    }
}
