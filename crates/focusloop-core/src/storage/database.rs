//! SQLite-backed store.
//!
//! Provides persistent storage for:
//! - Focus session records
//! - The single "current timer state" row used for crash recovery
//! - A key-value table for small application state
//!
//! The current timer state lives in the kv table under a fixed key: there is
//! at most one in-flight timer per process, so the recovery protocol only
//! ever reads and writes that one row.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::TimerState;

use super::data_dir;
use super::store::{SessionRecord, TimerStore};

/// Fixed kv key holding the persisted `TimerState`.
const CURRENT_STATE_KEY: &str = "current_timer_state";

/// SQLite database implementing [`TimerStore`].
pub struct Database {
    conn: Mutex<Connection>,
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Database {
    /// Open the database at `<data_dir>/focusloop.db`, creating the file
    /// and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let path = data_dir()?.join("focusloop.db");
        let conn = Connection::open(&path).map_err(|source| StoreError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    #[cfg(test)]
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        lock(&self.conn)
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id              TEXT PRIMARY KEY,
                    started_at      TEXT NOT NULL,
                    planned_focus_ms INTEGER NOT NULL,
                    warmup_skipped  INTEGER NOT NULL DEFAULT 0,
                    completed       INTEGER NOT NULL DEFAULT 0,
                    actual_focus_ms INTEGER,
                    completed_at    TEXT,
                    mood_start      TEXT,
                    mood_end        TEXT
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
                CREATE INDEX IF NOT EXISTS idx_sessions_completed ON sessions(completed);",
            )
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = lock(&self.conn);
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.conn).execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.conn).execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Sessions most recently started first.
    pub fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRecord>, StoreError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT id, started_at, planned_focus_ms, warmup_skipped, completed,
                    actual_focus_ms, completed_at, mood_start, mood_end
             FROM sessions ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let id: String = row.get(0)?;
    let started_at: String = row.get(1)?;
    let completed_at: Option<String> = row.get(6)?;
    Ok(SessionRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        started_at: parse_rfc3339(&started_at),
        planned_focus_ms: row.get(2)?,
        warmup_skipped: row.get::<_, i64>(3)? != 0,
        completed: row.get::<_, i64>(4)? != 0,
        actual_focus_ms: row.get(5)?,
        completed_at: completed_at.as_deref().map(parse_rfc3339),
        mood_start: row.get(7)?,
        mood_end: row.get(8)?,
    })
}

fn parse_rfc3339(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl TimerStore for Database {
    fn load_current(&self) -> Result<Option<TimerState>, StoreError> {
        match self.kv_get(CURRENT_STATE_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_current(&self, state: &TimerState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        self.kv_set(CURRENT_STATE_KEY, &json)
    }

    fn clear_current(&self) -> Result<(), StoreError> {
        self.kv_delete(CURRENT_STATE_KEY)
    }

    fn create_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        lock(&self.conn).execute(
            "INSERT INTO sessions
                 (id, started_at, planned_focus_ms, warmup_skipped, completed,
                  actual_focus_ms, completed_at, mood_start, mood_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.started_at.to_rfc3339(),
                record.planned_focus_ms,
                record.warmup_skipped as i64,
                record.completed as i64,
                record.actual_focus_ms,
                record.completed_at.map(|at| at.to_rfc3339()),
                record.mood_start,
                record.mood_end,
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StoreError> {
        let conn = lock(&self.conn);
        let record = conn
            .query_row(
                "SELECT id, started_at, planned_focus_ms, warmup_skipped, completed,
                        actual_focus_ms, completed_at, mood_start, mood_end
                 FROM sessions WHERE id = ?1",
                params![id.to_string()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn complete_session(
        &self,
        id: Uuid,
        actual_focus_ms: u64,
        completed_at: DateTime<Utc>,
        mood_end: Option<String>,
    ) -> Result<(), StoreError> {
        let updated = lock(&self.conn).execute(
            "UPDATE sessions
             SET completed = 1, actual_focus_ms = ?2, completed_at = ?3,
                 mood_end = COALESCE(?4, mood_end)
             WHERE id = ?1",
            params![
                id.to_string(),
                actual_focus_ms,
                completed_at.to_rfc3339(),
                mood_end,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(id));
        }
        Ok(())
    }

    fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        lock(&self.conn).execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }
}
