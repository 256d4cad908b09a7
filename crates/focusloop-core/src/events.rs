use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::TimerMode;

/// Every state change in the session layer produces an Event.
/// The hosting UI subscribes to these; the CLI prints them as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    WarmupStarted {
        session_id: Uuid,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    FocusStarted {
        session_id: Uuid,
        duration_ms: u64,
        warmup_skipped: bool,
        at: DateTime<Utc>,
    },
    BreakStarted {
        session_id: Option<Uuid>,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    /// Focus finished; the session record now carries the actual elapsed
    /// focus time.
    FocusCompleted {
        session_id: Option<Uuid>,
        actual_focus_ms: u64,
        at: DateTime<Utc>,
    },
    BreakCompleted {
        at: DateTime<Utc>,
    },
    TimerPaused {
        mode: TimerMode,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        mode: TimerMode,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    TimerStopped {
        at: DateTime<Utc>,
    },
    TargetAdjusted {
        mode: TimerMode,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// A persisted non-idle state was restored on explicit confirmation.
    SessionRecovered {
        mode: TimerMode,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    RecoveryDiscarded {
        at: DateTime<Utc>,
    },
    /// The gap between ticks exceeded the drift threshold.
    DriftDetected {
        deviation_ms: i64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        mode: TimerMode,
        remaining_ms: u64,
        session_id: Option<Uuid>,
        is_running: bool,
        is_paused: bool,
        at: DateTime<Utc>,
    },
}
