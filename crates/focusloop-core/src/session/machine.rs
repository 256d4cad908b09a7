//! Session lifecycle state machine.
//!
//! Sequences the work cycle (idle → warmup → focus → break → idle), owns
//! session identity and the persisted [`TimerState`], and mediates crash
//! recovery. The machine is the single authority on timing state: every
//! mutation is computed here, mirrored into the engine with absolute
//! timestamps, and persisted before the action returns.
//!
//! Invalid operations (resume without pause, pause while idle, ...) are
//! silent no-ops so the machine stays tolerant of redundant UI events. A
//! store failure surfaces to the caller of the triggering action but never
//! rolls back the in-memory transition.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::events::Event;
use crate::storage::{SessionRecord, TimerStore};
use crate::timer::{TimerEngine, TimerMode};

use super::state::TimerState;

/// Phase durations for one work cycle.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub warmup_ms: u64,
    pub focus_ms: u64,
    pub break_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 15 * 60 * 1_000,
            focus_ms: 25 * 60 * 1_000,
            break_ms: 5 * 60 * 1_000,
        }
    }
}

struct Inner {
    state: TimerState,
    /// Persisted non-idle state found at startup, awaiting explicit
    /// confirmation. Never auto-resumed.
    recoverable: Option<TimerState>,
    /// Currently-selected mood, supplied by the host.
    mood: Option<String>,
}

type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// The session state machine. Construct with [`SessionStateMachine::new`];
/// the returned `Arc` is what the engine's completion callback holds (weakly)
/// to auto-advance phases.
pub struct SessionStateMachine {
    engine: Arc<TimerEngine>,
    store: Arc<dyn TimerStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    on_event: Mutex<Option<EventCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStateMachine {
    pub fn new(
        engine: Arc<TimerEngine>,
        store: Arc<dyn TimerStore>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::with_clock(engine, store, config, Arc::new(SystemClock))
    }

    /// Construction-time rehydration: a persisted non-idle state is surfaced
    /// through [`recoverable`] rather than silently resumed. A failed read
    /// degrades to "no recoverable session".
    ///
    /// [`recoverable`]: SessionStateMachine::recoverable
    pub fn with_clock(
        engine: Arc<TimerEngine>,
        store: Arc<dyn TimerStore>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let recoverable = match store.load_current() {
            Ok(Some(state)) if !state.mode.is_idle() => Some(state),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read persisted timer state");
                None
            }
        };

        let machine = Arc::new(Self {
            engine,
            store,
            clock,
            config,
            inner: Mutex::new(Inner {
                state: TimerState::idle(),
                recoverable,
                mood: None,
            }),
            on_event: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&machine);
        machine.engine.on_complete(move || {
            if let Some(machine) = weak.upgrade() {
                if let Err(err) = machine.complete() {
                    tracing::error!(error = %err, "failed to persist phase completion");
                }
            }
        });
        let weak: Weak<Self> = Arc::downgrade(&machine);
        machine.engine.on_drift_detected(move |deviation_ms| {
            if let Some(machine) = weak.upgrade() {
                let at = machine.clock.now();
                machine.emit(Event::DriftDetected { deviation_ms, at });
            }
        });

        machine
    }

    // ── Subscriptions & queries ──────────────────────────────────────

    /// Subscribe to session events. The engine's `on_tick` slot is left for
    /// the host; this machine claims `on_complete` and `on_drift_detected`.
    pub fn on_event(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        *lock(&self.on_event) = Some(Arc::new(callback));
    }

    pub fn engine(&self) -> &Arc<TimerEngine> {
        &self.engine
    }

    pub fn mode(&self) -> TimerMode {
        lock(&self.inner).state.mode
    }

    pub fn state(&self) -> TimerState {
        lock(&self.inner).state.clone()
    }

    /// Derived remaining time for the current phase (frozen value while
    /// paused, 0 while idle).
    pub fn remaining_ms(&self) -> u64 {
        lock(&self.inner).state.remaining_ms(self.clock.now_ms())
    }

    pub fn snapshot(&self) -> Event {
        let now_ms = self.clock.now_ms();
        let inner = lock(&self.inner);
        Event::StateSnapshot {
            mode: inner.state.mode,
            remaining_ms: inner.state.remaining_ms(now_ms),
            session_id: inner.state.session_id,
            is_running: inner.state.is_running,
            is_paused: inner.state.is_paused,
            at: self.clock.now(),
        }
    }

    /// Select the current mood. Compared against the session's start mood
    /// when focus completes.
    pub fn set_mood(&self, mood: Option<String>) {
        lock(&self.inner).mood = mood;
    }

    // ── Lifecycle actions ────────────────────────────────────────────

    /// idle → warmup. Creates a new session record and starts the warmup
    /// countdown. No-op unless idle.
    pub fn start_warmup(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let (state, record) = {
            let mut inner = lock(&self.inner);
            if !inner.state.mode.is_idle() {
                return Ok(None);
            }
            let session_id = Uuid::new_v4();
            let record = SessionRecord::begin(
                session_id,
                self.clock.now(),
                self.config.focus_ms,
                false,
                inner.mood.clone(),
            );
            inner.state = TimerState {
                mode: TimerMode::Warmup,
                started_at_ms: Some(now_ms),
                target_at_ms: Some(now_ms + self.config.warmup_ms),
                paused_at_ms: None,
                session_id: Some(session_id),
                last_update_ms: now_ms,
                is_running: true,
                is_paused: false,
                mood_start: inner.mood.clone(),
            };
            (inner.state.clone(), record)
        };

        self.mirror_running(&state);
        self.store.create_session(&record)?;
        self.persist(&state)?;

        let event = Event::WarmupStarted {
            session_id: record.id,
            duration_ms: self.config.warmup_ms,
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// idle → focus (warmup skipped at creation) or warmup → focus (reusing
    /// the warmup's session record). No-op from focus or break.
    pub fn start_focus(&self) -> Result<Option<Event>> {
        self.advance_to_focus()
    }

    /// Freeze the current countdown. No-op if idle or already paused.
    pub fn pause(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let state = {
            let mut inner = lock(&self.inner);
            if !inner.state.is_running || inner.state.is_paused {
                return Ok(None);
            }
            inner.state.paused_at_ms = Some(now_ms);
            inner.state.is_running = false;
            inner.state.is_paused = true;
            inner.state.last_update_ms = now_ms;
            inner.state.clone()
        };

        self.engine.pause();
        self.persist(&state)?;

        let event = Event::TimerPaused {
            mode: state.mode,
            remaining_ms: state.remaining_ms(now_ms),
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// Continue a paused countdown, shifting the target forward by the
    /// paused duration. No-op if not paused.
    pub fn resume(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let state = {
            let mut inner = lock(&self.inner);
            if !inner.state.is_paused {
                return Ok(None);
            }
            let (Some(paused_at), Some(target_at)) =
                (inner.state.paused_at_ms, inner.state.target_at_ms)
            else {
                return Ok(None);
            };
            let paused_for = now_ms.saturating_sub(paused_at);
            inner.state.target_at_ms = Some(target_at.saturating_add(paused_for));
            inner.state.paused_at_ms = None;
            inner.state.is_running = true;
            inner.state.is_paused = false;
            inner.state.last_update_ms = now_ms;
            inner.state.clone()
        };

        self.mirror_running(&state);
        self.persist(&state)?;

        let event = Event::TimerResumed {
            mode: state.mode,
            remaining_ms: state.remaining_ms(now_ms),
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// Skip the current phase: warmup and focus skip forward as completions,
    /// a skipped break stops the cycle.
    pub fn skip(&self) -> Result<Option<Event>> {
        match self.mode() {
            TimerMode::Warmup => self.advance_to_focus(),
            TimerMode::Focus => self.finish_focus(),
            TimerMode::Break => self.stop(),
            TimerMode::Idle => Ok(None),
        }
    }

    /// Complete the current phase as if its countdown reached zero. This is
    /// also the engine's completion path.
    pub fn complete(&self) -> Result<Option<Event>> {
        match self.mode() {
            TimerMode::Warmup => self.advance_to_focus(),
            TimerMode::Focus => self.finish_focus(),
            TimerMode::Break => self.finish_break(),
            TimerMode::Idle => Ok(None),
        }
    }

    /// Abandon the current phase and return to idle. The session record is
    /// left uncompleted; the persisted timer state is deleted.
    pub fn stop(&self) -> Result<Option<Event>> {
        {
            let mut inner = lock(&self.inner);
            if inner.state.mode.is_idle() {
                return Ok(None);
            }
            inner.state = TimerState::idle();
        }

        self.engine.stop();
        self.store.clear_current()?;

        let event = Event::TimerStopped {
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    // ── Target adjustments ───────────────────────────────────────────

    /// Move the current phase's target to an absolute timestamp.
    pub fn set_target_time(&self, target_at_ms: u64) -> Result<Option<Event>> {
        self.adjust_target(|_, _| target_at_ms)
    }

    /// Push the current phase's target further out.
    pub fn add_time(&self, ms: u64) -> Result<Option<Event>> {
        self.adjust_target(|target, _| target.saturating_add(ms))
    }

    /// Pull the current phase's target in, clamped at `now()`.
    pub fn subtract_time(&self, ms: u64) -> Result<Option<Event>> {
        self.adjust_target(|target, now| target.saturating_sub(ms).max(now))
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// The persisted non-idle state found at startup, if any.
    pub fn recoverable(&self) -> Option<TimerState> {
        lock(&self.inner).recoverable.clone()
    }

    /// Restore the recoverable session. A running state resumes ticking
    /// toward its original target (or completes immediately if the target
    /// has already passed); a paused state is restored still paused.
    pub fn recover_session(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let mut state = {
            let mut inner = lock(&self.inner);
            let Some(state) = inner.recoverable.take() else {
                return Ok(None);
            };
            state
        };

        if state.is_paused {
            // Frozen remaining is target - paused_at; downtime is absorbed
            // by the shift at resume time, so the record restores verbatim.
            {
                let mut inner = lock(&self.inner);
                inner.state = state.clone();
                inner.mood = inner.mood.take().or_else(|| state.mood_start.clone());
            }
            self.engine.stop();
            self.persist(&state)?;
            let event = Event::SessionRecovered {
                mode: state.mode,
                remaining_ms: state.remaining_ms(now_ms),
                at: self.clock.now(),
            };
            self.emit(event.clone());
            return Ok(Some(event));
        }

        state.is_running = true;
        state.last_update_ms = now_ms;
        let expired = state.target_at_ms.map(|t| t <= now_ms).unwrap_or(true);
        {
            let mut inner = lock(&self.inner);
            inner.state = state.clone();
            inner.mood = inner.mood.take().or_else(|| state.mood_start.clone());
        }

        if expired {
            // The countdown elapsed while we were gone; complete it through
            // the normal path instead of arming a timer that fires at once.
            let event = Event::SessionRecovered {
                mode: state.mode,
                remaining_ms: 0,
                at: self.clock.now(),
            };
            self.emit(event.clone());
            self.complete()?;
            return Ok(Some(event));
        }

        self.mirror_running(&state);
        self.persist(&state)?;
        let event = Event::SessionRecovered {
            mode: state.mode,
            remaining_ms: state.remaining_ms(now_ms),
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// Discard the recoverable session: delete its in-progress session
    /// record and the persisted timer state.
    pub fn discard_recovery(&self) -> Result<Option<Event>> {
        let state = {
            let mut inner = lock(&self.inner);
            let Some(state) = inner.recoverable.take() else {
                return Ok(None);
            };
            state
        };

        if let Some(session_id) = state.session_id {
            self.store.delete_session(session_id)?;
        }
        self.store.clear_current()?;

        let event = Event::RecoveryDiscarded {
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn advance_to_focus(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let (state, created, warmup_skipped) = {
            let mut inner = lock(&self.inner);
            let (session_id, created, warmup_skipped) = match inner.state.mode {
                TimerMode::Idle => {
                    let session_id = Uuid::new_v4();
                    let record = SessionRecord::begin(
                        session_id,
                        self.clock.now(),
                        self.config.focus_ms,
                        true,
                        inner.mood.clone(),
                    );
                    (session_id, Some(record), true)
                }
                TimerMode::Warmup => match inner.state.session_id {
                    // Reuse the warmup's session record.
                    Some(session_id) => (session_id, None, false),
                    None => {
                        let session_id = Uuid::new_v4();
                        let record = SessionRecord::begin(
                            session_id,
                            self.clock.now(),
                            self.config.focus_ms,
                            false,
                            inner.state.mood_start.clone(),
                        );
                        (session_id, Some(record), false)
                    }
                },
                TimerMode::Focus | TimerMode::Break => return Ok(None),
            };
            let mood_start = if warmup_skipped {
                inner.mood.clone()
            } else {
                inner.state.mood_start.clone()
            };
            inner.state = TimerState {
                mode: TimerMode::Focus,
                started_at_ms: Some(now_ms),
                target_at_ms: Some(now_ms + self.config.focus_ms),
                paused_at_ms: None,
                session_id: Some(session_id),
                last_update_ms: now_ms,
                is_running: true,
                is_paused: false,
                mood_start,
            };
            (inner.state.clone(), created, warmup_skipped)
        };

        self.mirror_running(&state);
        if let Some(record) = &created {
            self.store.create_session(record)?;
        }
        self.persist(&state)?;

        let event = Event::FocusStarted {
            session_id: state.session_id.unwrap_or_default(),
            duration_ms: self.config.focus_ms,
            warmup_skipped,
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// focus → break: record actual elapsed focus time (and the end-of-
    /// session mood when it changed), then auto-start the break.
    fn finish_focus(&self) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let (state, session_id, actual_focus_ms, mood_end) = {
            let mut inner = lock(&self.inner);
            if inner.state.mode != TimerMode::Focus {
                return Ok(None);
            }
            let started = inner.state.started_at_ms.unwrap_or(now_ms);
            // A countdown cannot run past its own target: wall-clock time
            // beyond it (sleep, crash, late tick) is not focus time.
            let end = inner.state.target_at_ms.map_or(now_ms, |t| now_ms.min(t));
            let actual_focus_ms = end.saturating_sub(started);
            // Persist the end mood only when it actually changed.
            let mood_end = if inner.mood != inner.state.mood_start {
                inner.mood.clone()
            } else {
                None
            };
            let session_id = inner.state.session_id;
            let mood_start = inner.state.mood_start.clone();
            inner.state = TimerState {
                mode: TimerMode::Break,
                started_at_ms: Some(now_ms),
                target_at_ms: Some(now_ms + self.config.break_ms),
                paused_at_ms: None,
                session_id,
                last_update_ms: now_ms,
                is_running: true,
                is_paused: false,
                mood_start,
            };
            (inner.state.clone(), session_id, actual_focus_ms, mood_end)
        };

        self.mirror_running(&state);
        if let Some(id) = session_id {
            self.store
                .complete_session(id, actual_focus_ms, self.clock.now(), mood_end)?;
        }
        self.persist(&state)?;

        let event = Event::FocusCompleted {
            session_id,
            actual_focus_ms,
            at: self.clock.now(),
        };
        self.emit(event.clone());
        self.emit(Event::BreakStarted {
            session_id,
            duration_ms: self.config.break_ms,
            at: self.clock.now(),
        });
        Ok(Some(event))
    }

    /// break → idle: clear session linkage and the persisted state.
    fn finish_break(&self) -> Result<Option<Event>> {
        {
            let mut inner = lock(&self.inner);
            if inner.state.mode != TimerMode::Break {
                return Ok(None);
            }
            inner.state = TimerState::idle();
        }

        self.engine.stop();
        self.store.clear_current()?;

        let event = Event::BreakCompleted {
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    fn adjust_target(&self, f: impl FnOnce(u64, u64) -> u64) -> Result<Option<Event>> {
        let now_ms = self.clock.now_ms();
        let state = {
            let mut inner = lock(&self.inner);
            let Some(target_at) = inner.state.target_at_ms else {
                return Ok(None);
            };
            inner.state.target_at_ms = Some(f(target_at, now_ms));
            inner.state.last_update_ms = now_ms;
            inner.state.clone()
        };

        if state.is_running {
            self.mirror_running(&state);
        }
        self.persist(&state)?;

        let event = Event::TargetAdjusted {
            mode: state.mode,
            remaining_ms: state.remaining_ms(now_ms),
            at: self.clock.now(),
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// Push an authoritative running state into the engine. The engine only
    /// mirrors; the machine owns the numbers.
    fn mirror_running(&self, state: &TimerState) {
        if let Some(target_at) = state.target_at_ms {
            self.engine
                .set_target_time(target_at, state.mode, state.started_at_ms);
        }
    }

    /// Persist the state while non-idle; idle clears the stored record.
    fn persist(&self, state: &TimerState) -> Result<()> {
        if state.mode.is_idle() {
            self.store.clear_current()?;
        } else {
            self.store.save_current(state)?;
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        let cb = lock(&self.on_event).clone();
        if let Some(cb) = cb {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                tracing::warn!("event subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::error::{CoreError, StoreError};
    use crate::storage::Database;
    use crate::timer::{EngineConfig, ManualScheduler};
    use chrono::{DateTime, Utc};

    const T0: u64 = 1_700_000_000_000;
    const WARMUP_MS: u64 = 60_000;
    const FOCUS_MS: u64 = 1_500_000;
    const BREAK_MS: u64 = 300_000;

    struct Rig {
        machine: Arc<SessionStateMachine>,
        clock: Arc<MockClock>,
        frame: ManualScheduler,
        db: Arc<Database>,
    }

    fn config() -> SessionConfig {
        SessionConfig {
            warmup_ms: WARMUP_MS,
            focus_ms: FOCUS_MS,
            break_ms: BREAK_MS,
        }
    }

    fn rig() -> Rig {
        rig_with_db(Arc::new(Database::open_memory().unwrap()))
    }

    fn rig_with_db(db: Arc<Database>) -> Rig {
        let clock = MockClock::new(T0);
        let frame = ManualScheduler::new();
        let interval = ManualScheduler::new();
        let engine = Arc::new(TimerEngine::with_parts(
            clock.clone(),
            Box::new(frame.clone()),
            Box::new(interval.clone()),
            EngineConfig::default(),
        ));
        let machine = SessionStateMachine::with_clock(
            engine,
            Arc::clone(&db) as Arc<dyn TimerStore>,
            config(),
            clock.clone(),
        );
        Rig {
            machine,
            clock,
            frame,
            db,
        }
    }

    fn started_session_id(event: Option<Event>) -> Uuid {
        match event {
            Some(Event::WarmupStarted { session_id, .. })
            | Some(Event::FocusStarted { session_id, .. }) => session_id,
            other => panic!("expected a start event, got {other:?}"),
        }
    }

    #[test]
    fn warmup_creates_a_session_and_persists_state() {
        let rig = rig();
        let event = rig.machine.start_warmup().unwrap();
        let session_id = started_session_id(event);

        assert_eq!(rig.machine.mode(), TimerMode::Warmup);
        assert_eq!(rig.machine.remaining_ms(), WARMUP_MS);
        assert!(rig.machine.engine().is_running());

        let persisted = rig.db.load_current().unwrap().unwrap();
        assert_eq!(persisted.mode, TimerMode::Warmup);
        assert_eq!(persisted.session_id, Some(session_id));

        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(!record.completed);
        assert!(!record.warmup_skipped);
    }

    #[test]
    fn start_warmup_while_running_is_a_no_op() {
        let rig = rig();
        rig.machine.start_warmup().unwrap();
        assert!(rig.machine.start_warmup().unwrap().is_none());
    }

    #[test]
    fn warmup_completion_auto_advances_to_focus() {
        let rig = rig();
        let event = rig.machine.start_warmup().unwrap();
        let session_id = started_session_id(event);

        rig.clock.advance(WARMUP_MS);
        rig.frame.fire();

        assert_eq!(rig.machine.mode(), TimerMode::Focus);
        assert_eq!(rig.machine.state().session_id, Some(session_id));
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS);
        // Still the same single session record.
        assert_eq!(rig.db.recent_sessions(10).unwrap().len(), 1);
    }

    #[test]
    fn skip_during_warmup_advances_without_duplicating_the_session() {
        let rig = rig();
        let event = rig.machine.start_warmup().unwrap();
        let session_id = started_session_id(event);

        let skipped = rig.machine.skip().unwrap();
        match skipped {
            Some(Event::FocusStarted {
                session_id: focus_session,
                warmup_skipped,
                ..
            }) => {
                assert_eq!(focus_session, session_id);
                assert!(!warmup_skipped);
            }
            other => panic!("expected FocusStarted, got {other:?}"),
        }
        assert_eq!(rig.machine.mode(), TimerMode::Focus);
        assert_eq!(rig.db.recent_sessions(10).unwrap().len(), 1);
    }

    #[test]
    fn start_focus_from_idle_skips_warmup() {
        let rig = rig();
        let event = rig.machine.start_focus().unwrap();
        match event {
            Some(Event::FocusStarted {
                warmup_skipped, ..
            }) => assert!(warmup_skipped),
            other => panic!("expected FocusStarted, got {other:?}"),
        }
        assert_eq!(rig.machine.mode(), TimerMode::Focus);
        let record = &rig.db.recent_sessions(1).unwrap()[0];
        assert!(record.warmup_skipped);
    }

    #[test]
    fn skip_during_focus_records_elapsed_and_starts_break() {
        let rig = rig();
        let event = rig.machine.start_focus().unwrap();
        let session_id = started_session_id(event);

        rig.clock.advance(600_000);
        let completed = rig.machine.skip().unwrap();
        match completed {
            Some(Event::FocusCompleted {
                actual_focus_ms, ..
            }) => assert_eq!(actual_focus_ms, 600_000),
            other => panic!("expected FocusCompleted, got {other:?}"),
        }

        assert_eq!(rig.machine.mode(), TimerMode::Break);
        assert_eq!(rig.machine.remaining_ms(), BREAK_MS);
        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(record.completed);
        assert_eq!(record.actual_focus_ms, Some(600_000));
    }

    #[test]
    fn skip_during_break_stops_the_cycle() {
        let rig = rig();
        rig.machine.start_focus().unwrap();
        rig.machine.skip().unwrap(); // focus -> break
        rig.machine.skip().unwrap(); // break -> idle

        assert_eq!(rig.machine.mode(), TimerMode::Idle);
        assert!(rig.db.load_current().unwrap().is_none());
        assert!(!rig.machine.engine().is_running());
    }

    #[test]
    fn pause_freezes_remaining_and_resume_compensates() {
        let rig = rig();
        rig.machine.start_focus().unwrap();
        rig.clock.advance(10_000);

        rig.machine.pause().unwrap();
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS - 10_000);
        // Engine remaining reads 0 while paused; the snapshot carries the
        // frozen value.
        assert_eq!(rig.machine.engine().remaining_ms(), 0);

        // A long lunch.
        rig.clock.advance(3_600_000);
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS - 10_000);

        rig.machine.resume().unwrap();
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS - 10_000);
        assert!(rig.machine.engine().is_running());

        let persisted = rig.db.load_current().unwrap().unwrap();
        assert!(persisted.is_running);
        assert_eq!(persisted.paused_at_ms, None);
    }

    #[test]
    fn redundant_pause_and_resume_are_no_ops() {
        let rig = rig();
        assert!(rig.machine.pause().unwrap().is_none());
        assert!(rig.machine.resume().unwrap().is_none());

        rig.machine.start_warmup().unwrap();
        rig.machine.pause().unwrap();
        assert!(rig.machine.pause().unwrap().is_none());
        rig.machine.resume().unwrap();
        assert!(rig.machine.resume().unwrap().is_none());
    }

    #[test]
    fn stop_abandons_the_phase_but_keeps_the_session_record() {
        let rig = rig();
        let event = rig.machine.start_warmup().unwrap();
        let session_id = started_session_id(event);

        rig.machine.stop().unwrap();
        assert_eq!(rig.machine.mode(), TimerMode::Idle);
        assert!(rig.db.load_current().unwrap().is_none());

        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(!record.completed);
    }

    #[test]
    fn add_and_subtract_time_persist_the_new_target() {
        let rig = rig();
        rig.machine.start_focus().unwrap();
        rig.machine.add_time(60_000).unwrap();
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS + 60_000);

        rig.machine.subtract_time(120_000).unwrap();
        assert_eq!(rig.machine.remaining_ms(), FOCUS_MS - 60_000);

        let persisted = rig.db.load_current().unwrap().unwrap();
        assert_eq!(persisted.target_at_ms, Some(T0 + FOCUS_MS - 60_000));

        // Clamped at now.
        rig.machine.subtract_time(10 * FOCUS_MS).unwrap();
        assert_eq!(rig.machine.remaining_ms(), 0);
    }

    #[test]
    fn mood_end_is_captured_only_when_it_changed() {
        let rig = rig();
        rig.machine.set_mood(Some("calm".into()));
        let event = rig.machine.start_focus().unwrap();
        let session_id = started_session_id(event);

        rig.machine.set_mood(Some("tired".into()));
        rig.clock.advance(100_000);
        rig.machine.complete().unwrap();

        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert_eq!(record.mood_start.as_deref(), Some("calm"));
        assert_eq!(record.mood_end.as_deref(), Some("tired"));

        // Unchanged mood is omitted.
        rig.machine.skip().unwrap(); // break -> idle
        rig.machine.set_mood(Some("calm".into()));
        let event = rig.machine.start_focus().unwrap();
        let session_id = started_session_id(event);
        rig.machine.complete().unwrap();
        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert_eq!(record.mood_end, None);
    }

    #[test]
    fn end_to_end_cycle() {
        let rig = rig();
        let event = rig.machine.start_warmup().unwrap();
        let session_id = started_session_id(event);

        // Warmup runs out; the engine tick advances us into focus.
        rig.clock.advance(WARMUP_MS);
        rig.frame.fire();
        assert_eq!(rig.machine.mode(), TimerMode::Focus);

        // A full focus phase later, complete() records the actual time and
        // auto-starts the break.
        rig.clock.advance(1_500_000);
        rig.machine.complete().unwrap();

        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(record.completed);
        assert_eq!(record.actual_focus_ms, Some(1_500_000));
        assert_eq!(rig.machine.mode(), TimerMode::Break);
        assert!(rig.machine.engine().is_running());

        // Break completes back to idle and clears the persisted state.
        rig.clock.advance(BREAK_MS);
        rig.frame.fire();
        assert_eq!(rig.machine.mode(), TimerMode::Idle);
        assert!(rig.db.load_current().unwrap().is_none());
    }

    // ── Recovery ─────────────────────────────────────────────────────

    fn persisted_focus_state(db: &Database, target_at_ms: u64, started_at_ms: u64) -> Uuid {
        let session_id = Uuid::new_v4();
        let record = SessionRecord::begin(session_id, Utc::now(), FOCUS_MS, true, None);
        db.create_session(&record).unwrap();
        let state = TimerState {
            mode: TimerMode::Focus,
            started_at_ms: Some(started_at_ms),
            target_at_ms: Some(target_at_ms),
            paused_at_ms: None,
            session_id: Some(session_id),
            last_update_ms: started_at_ms,
            is_running: true,
            is_paused: false,
            mood_start: None,
        };
        db.save_current(&state).unwrap();
        session_id
    }

    #[test]
    fn persisted_state_surfaces_as_recoverable() {
        let db = Arc::new(Database::open_memory().unwrap());
        persisted_focus_state(&db, T0 + 600_000, T0 - 300_000);

        let rig = rig_with_db(db);
        let recoverable = rig.machine.recoverable().unwrap();
        assert_eq!(recoverable.mode, TimerMode::Focus);
        // Not silently resumed.
        assert_eq!(rig.machine.mode(), TimerMode::Idle);
        assert!(!rig.machine.engine().is_running());
    }

    #[test]
    fn recover_session_restores_the_countdown() {
        let db = Arc::new(Database::open_memory().unwrap());
        let session_id = persisted_focus_state(&db, T0 + 600_000, T0 - 300_000);

        let rig = rig_with_db(db);
        let event = rig.machine.recover_session().unwrap();
        match event {
            Some(Event::SessionRecovered {
                mode,
                remaining_ms,
                ..
            }) => {
                assert_eq!(mode, TimerMode::Focus);
                assert_eq!(remaining_ms, 600_000);
            }
            other => panic!("expected SessionRecovered, got {other:?}"),
        }

        assert_eq!(rig.machine.mode(), TimerMode::Focus);
        assert_eq!(rig.machine.state().session_id, Some(session_id));
        assert!(rig.machine.engine().is_running());
        assert_eq!(rig.machine.engine().remaining_ms(), 600_000);
        assert!(rig.machine.recoverable().is_none());
    }

    #[test]
    fn recovering_an_expired_target_completes_the_phase() {
        let db = Arc::new(Database::open_memory().unwrap());
        let session_id = persisted_focus_state(&db, T0 - 100_000, T0 - 1_600_000);

        let rig = rig_with_db(db);
        rig.machine.recover_session().unwrap();

        // Focus elapsed while the process was gone; we land in break with
        // the actual focus time capped at the phase's own length.
        assert_eq!(rig.machine.mode(), TimerMode::Break);
        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(record.completed);
        assert_eq!(record.actual_focus_ms, Some(1_500_000));
    }

    #[test]
    fn week_late_recovery_does_not_inflate_focus_time() {
        const WEEK_MS: u64 = 7 * 24 * 3_600_000;
        let db = Arc::new(Database::open_memory().unwrap());
        // Focus started and its target passed a week before this process
        // came back up.
        let session_id =
            persisted_focus_state(&db, T0 - WEEK_MS, T0 - WEEK_MS - FOCUS_MS);

        let rig = rig_with_db(db);
        rig.machine.recover_session().unwrap();

        let record = rig.db.get_session(session_id).unwrap().unwrap();
        assert!(record.completed);
        // The downtime is not focus time.
        assert_eq!(record.actual_focus_ms, Some(FOCUS_MS));
    }

    #[test]
    fn recovering_a_paused_state_stays_paused() {
        let db = Arc::new(Database::open_memory().unwrap());
        let state = TimerState {
            mode: TimerMode::Focus,
            started_at_ms: Some(T0 - 600_000),
            target_at_ms: Some(T0 + 900_000),
            paused_at_ms: Some(T0 - 60_000),
            session_id: None,
            last_update_ms: T0 - 60_000,
            is_running: false,
            is_paused: true,
            mood_start: None,
        };
        db.save_current(&state).unwrap();

        let rig = rig_with_db(db);
        rig.machine.recover_session().unwrap();

        assert_eq!(rig.machine.mode(), TimerMode::Focus);
        assert!(rig.machine.state().is_paused);
        assert!(!rig.machine.engine().is_running());
        // Frozen remaining, unaffected by the downtime.
        assert_eq!(rig.machine.remaining_ms(), 960_000);

        rig.machine.resume().unwrap();
        assert_eq!(rig.machine.remaining_ms(), 960_000);
        assert!(rig.machine.engine().is_running());
    }

    #[test]
    fn discard_recovery_deletes_record_and_state() {
        let db = Arc::new(Database::open_memory().unwrap());
        let session_id = persisted_focus_state(&db, T0 + 600_000, T0 - 300_000);

        let rig = rig_with_db(db);
        rig.machine.discard_recovery().unwrap();

        assert!(rig.machine.recoverable().is_none());
        assert!(rig.db.load_current().unwrap().is_none());
        assert!(rig.db.get_session(session_id).unwrap().is_none());
        assert_eq!(rig.machine.mode(), TimerMode::Idle);
    }

    #[test]
    fn recover_without_a_recoverable_is_a_no_op() {
        let rig = rig();
        assert!(rig.machine.recover_session().unwrap().is_none());
        assert!(rig.machine.discard_recovery().unwrap().is_none());
    }

    // ── Store failure semantics ──────────────────────────────────────

    struct FailingStore;

    impl TimerStore for FailingStore {
        fn load_current(&self) -> Result<Option<TimerState>, StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn save_current(&self, _state: &TimerState) -> Result<(), StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn clear_current(&self) -> Result<(), StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn create_session(&self, _record: &SessionRecord) -> Result<(), StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn get_session(&self, _id: Uuid) -> Result<Option<SessionRecord>, StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn complete_session(
            &self,
            _id: Uuid,
            _actual_focus_ms: u64,
            _completed_at: DateTime<Utc>,
            _mood_end: Option<String>,
        ) -> Result<(), StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
        fn delete_session(&self, _id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::QueryFailed("store down".into()))
        }
    }

    #[test]
    fn recovery_read_failure_degrades_to_no_recoverable() {
        let clock = MockClock::new(T0);
        let engine = Arc::new(TimerEngine::with_parts(
            clock.clone(),
            Box::new(ManualScheduler::new()),
            Box::new(ManualScheduler::new()),
            EngineConfig::default(),
        ));
        let machine = SessionStateMachine::with_clock(
            engine,
            Arc::new(FailingStore),
            config(),
            clock,
        );
        assert!(machine.recoverable().is_none());
        assert_eq!(machine.mode(), TimerMode::Idle);
    }

    #[test]
    fn persistence_failure_surfaces_without_rolling_back() {
        let clock = MockClock::new(T0);
        let engine = Arc::new(TimerEngine::with_parts(
            clock.clone(),
            Box::new(ManualScheduler::new()),
            Box::new(ManualScheduler::new()),
            EngineConfig::default(),
        ));
        let machine = SessionStateMachine::with_clock(
            engine,
            Arc::new(FailingStore),
            config(),
            clock,
        );

        let result = machine.start_warmup();
        assert!(matches!(result, Err(CoreError::Store(_))));
        // The in-memory transition stands; the caller decides what to tell
        // the user.
        assert_eq!(machine.mode(), TimerMode::Warmup);
        assert!(machine.engine().is_running());
    }
}
