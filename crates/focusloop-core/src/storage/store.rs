//! Store boundary for the session layer.
//!
//! The state machine persists through this trait: one "current timer state"
//! record for crash recovery plus CRUD on session records. The SQLite
//! implementation lives in [`super::database`]; tests substitute doubles to
//! exercise failure paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::TimerState;

/// One focus session, owned by the store.
///
/// Created when warmup (or focus, when warmup is skipped) begins; completed
/// with the actual elapsed focus time. An abandoned session stays in the
/// table uncompleted unless explicitly discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub planned_focus_ms: u64,
    pub warmup_skipped: bool,
    pub completed: bool,
    pub actual_focus_ms: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mood_start: Option<String>,
    pub mood_end: Option<String>,
}

impl SessionRecord {
    /// A freshly started, not-yet-completed session.
    pub fn begin(
        id: Uuid,
        started_at: DateTime<Utc>,
        planned_focus_ms: u64,
        warmup_skipped: bool,
        mood_start: Option<String>,
    ) -> Self {
        Self {
            id,
            started_at,
            planned_focus_ms,
            warmup_skipped,
            completed: false,
            actual_focus_ms: None,
            completed_at: None,
            mood_start,
            mood_end: None,
        }
    }
}

/// Persistent record store consumed by the session state machine.
///
/// Writes must be durable when they return: the machine counts an action as
/// complete only after its store write succeeded. Store failures surface to
/// the caller of the triggering action and never corrupt in-memory state.
pub trait TimerStore: Send + Sync {
    /// Read the persisted "current timer state", if any.
    fn load_current(&self) -> Result<Option<TimerState>, StoreError>;

    /// Replace the persisted "current timer state".
    fn save_current(&self, state: &TimerState) -> Result<(), StoreError>;

    /// Delete the persisted "current timer state". Idempotent.
    fn clear_current(&self) -> Result<(), StoreError>;

    fn create_session(&self, record: &SessionRecord) -> Result<(), StoreError>;

    fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StoreError>;

    /// Mark a session completed with the actual elapsed focus time.
    fn complete_session(
        &self,
        id: Uuid,
        actual_focus_ms: u64,
        completed_at: DateTime<Utc>,
        mood_end: Option<String>,
    ) -> Result<(), StoreError>;

    /// Remove a session record. Idempotent.
    fn delete_session(&self, id: Uuid) -> Result<(), StoreError>;
}
