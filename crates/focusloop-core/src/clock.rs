//! Wall-clock abstraction.
//!
//! The clock is the only source of truth for elapsed and remaining time.
//! Remaining time is always derived from `target_at - now()` and never stored,
//! which is what keeps the countdown correct through backgrounding and sleep.

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Current wall-clock time as a chrono timestamp.
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests. Time only moves when told to.
#[cfg(test)]
pub(crate) struct MockClock {
    ms: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockClock {
    pub fn new(start_ms: u64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            ms: std::sync::atomic::AtomicU64::new(start_ms),
        })
    }

    pub fn advance(&self, delta_ms: u64) {
        self.ms
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.ms.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(std::sync::atomic::Ordering::SeqCst)
    }
}
