//! Drift-aware countdown engine.
//!
//! The engine owns an absolute target timestamp and schedules periodic
//! recomputation of the time remaining. Remaining time is always derived
//! from `target_at - now()`, never accumulated, so a countdown stays correct
//! through backgrounding, system sleep, and arbitrarily late ticks: a gap in
//! tick delivery only delays *observing* the countdown, never the countdown
//! itself.
//!
//! ## Threading
//!
//! Tick delivery runs on a scheduler worker thread; engine commands may come
//! from any thread. All timing state lives behind one mutex, and locks are
//! never held across a callback or a worker join. Callbacks are allowed to
//! re-enter the engine (the session layer restarts the countdown from
//! `on_complete`); re-entrant calls from the worker thread leave the live
//! loop in place instead of re-arming, which is what makes that safe.
//!
//! ## Callbacks
//!
//! Subscribers register `on_tick`, `on_complete`, and `on_drift_detected`
//! closures. A panic inside a callback is caught and logged; engine state is
//! settled before the callback runs, so a panicking subscriber can never
//! leave the loop half-stopped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};

use super::mode::TimerMode;
use super::scheduler::{
    FramePacedScheduler, IntervalScheduler, Scheduler, SchedulingStrategy, TickFn,
};

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Target cadence between ticks.
    pub nominal_interval_ms: u64,
    /// Deviation beyond which a tick gap counts as drift.
    pub drift_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nominal_interval_ms: 1_000,
            drift_threshold_ms: 5_000,
        }
    }
}

/// Internal timing state, mirrored from the session layer for scheduling
/// purposes only.
#[derive(Debug, Clone)]
struct EngineState {
    mode: TimerMode,
    target_at_ms: Option<u64>,
    started_at_ms: Option<u64>,
    paused_at_ms: Option<u64>,
    last_update_ms: u64,
    running: bool,
}

impl EngineState {
    fn idle() -> Self {
        Self {
            mode: TimerMode::Idle,
            target_at_ms: None,
            started_at_ms: None,
            paused_at_ms: None,
            last_update_ms: 0,
            running: false,
        }
    }
}

type TickCallback = Arc<dyn Fn(u64) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn() + Send + Sync>;
type DriftCallback = Arc<dyn Fn(i64) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    tick: Mutex<Option<TickCallback>>,
    complete: Mutex<Option<CompleteCallback>>,
    drift: Mutex<Option<DriftCallback>>,
}

impl Callbacks {
    fn emit_tick(&self, remaining_ms: u64) {
        let cb = lock(&self.tick).clone();
        if let Some(cb) = cb {
            if catch_unwind(AssertUnwindSafe(|| cb(remaining_ms))).is_err() {
                tracing::warn!("on_tick callback panicked");
            }
        }
    }

    fn emit_complete(&self) {
        let cb = lock(&self.complete).clone();
        if let Some(cb) = cb {
            if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                tracing::warn!("on_complete callback panicked");
            }
        }
    }

    fn emit_drift(&self, deviation_ms: i64) {
        let cb = lock(&self.drift).clone();
        if let Some(cb) = cb {
            if catch_unwind(AssertUnwindSafe(|| cb(deviation_ms))).is_err() {
                tracing::warn!("on_drift_detected callback panicked");
            }
        }
    }

    fn clear(&self) {
        lock(&self.tick).take();
        lock(&self.complete).take();
        lock(&self.drift).take();
    }
}

/// State shared with the scheduler worker's tick closure.
struct Shared {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    callbacks: Callbacks,
    /// Thread currently driving the tick loop. Engine calls made from this
    /// thread (i.e. from inside a callback) must not arm or join workers.
    worker_thread: Mutex<Option<ThreadId>>,
}

struct SchedulerBank {
    frame_paced: Box<dyn Scheduler>,
    interval: Box<dyn Scheduler>,
    strategy: SchedulingStrategy,
}

/// Wall-clock-anchored countdown engine.
pub struct TimerEngine {
    shared: Arc<Shared>,
    schedulers: Mutex<SchedulerBank>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Callback panics are caught before they can poison anything, and the
    // engine itself does not panic while holding a lock.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimerEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            Arc::new(SystemClock),
            Box::new(FramePacedScheduler::new()),
            Box::new(IntervalScheduler::new()),
            config,
        )
    }

    /// Assemble an engine from explicit parts. Production uses [`new`];
    /// tests inject a mock clock and manual schedulers.
    ///
    /// [`new`]: TimerEngine::new
    pub fn with_parts(
        clock: Arc<dyn Clock>,
        frame_paced: Box<dyn Scheduler>,
        interval: Box<dyn Scheduler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                config,
                state: Mutex::new(EngineState::idle()),
                callbacks: Callbacks::default(),
                worker_thread: Mutex::new(None),
            }),
            schedulers: Mutex::new(SchedulerBank {
                frame_paced,
                interval,
                strategy: SchedulingStrategy::FramePaced,
            }),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Invoked once per tick with the remaining milliseconds.
    pub fn on_tick(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        *lock(&self.shared.callbacks.tick) = Some(Arc::new(callback));
    }

    /// Invoked exactly once per countdown when it reaches zero.
    pub fn on_complete(&self, callback: impl Fn() + Send + Sync + 'static) {
        *lock(&self.shared.callbacks.complete) = Some(Arc::new(callback));
    }

    /// Invoked when the gap between ticks exceeds the drift threshold,
    /// with the signed deviation in milliseconds.
    pub fn on_drift_detected(&self, callback: impl Fn(i64) + Send + Sync + 'static) {
        *lock(&self.shared.callbacks.drift) = Some(Arc::new(callback));
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn mode(&self) -> TimerMode {
        lock(&self.shared.state).mode
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.state).paused_at_ms.is_some()
    }

    pub fn target_at_ms(&self) -> Option<u64> {
        lock(&self.shared.state).target_at_ms
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        lock(&self.shared.state).started_at_ms
    }

    pub fn last_update_ms(&self) -> u64 {
        lock(&self.shared.state).last_update_ms
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        lock(&self.schedulers).strategy
    }

    /// Milliseconds until the target, or 0 when idle or paused.
    ///
    /// While paused this reads 0 by design: remaining is only meaningful
    /// while the countdown runs, and pause-time remaining is derivable from
    /// the session snapshot (`target_at - paused_at`).
    pub fn remaining_ms(&self) -> u64 {
        let state = lock(&self.shared.state);
        if !state.running || state.paused_at_ms.is_some() {
            return 0;
        }
        state
            .target_at_ms
            .map(|t| t.saturating_sub(self.shared.clock.now_ms()))
            .unwrap_or(0)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a countdown of `duration_ms` for `mode`. Calling while already
    /// running replaces the previous countdown.
    pub fn start(&self, duration_ms: u64, mode: TimerMode) {
        if duration_ms == 0 {
            tracing::warn!(%mode, "ignoring start with zero duration");
            return;
        }
        let now = self.shared.clock.now_ms();
        {
            let mut state = lock(&self.shared.state);
            state.mode = mode;
            state.target_at_ms = Some(now.saturating_add(duration_ms));
            state.started_at_ms = Some(now);
            state.paused_at_ms = None;
            state.last_update_ms = now;
            state.running = true;
        }
        self.arm_active();
    }

    /// Freeze the countdown. No-op if not running or already paused.
    pub fn pause(&self) {
        let now = self.shared.clock.now_ms();
        let halted = {
            let mut state = lock(&self.shared.state);
            if !state.running || state.paused_at_ms.is_some() {
                false
            } else {
                state.paused_at_ms = Some(now);
                state.running = false;
                state.last_update_ms = now;
                true
            }
        };
        if halted {
            self.halt_loop();
        }
    }

    /// Continue a paused countdown. The target shifts forward by the paused
    /// duration, so remaining time is preserved across a pause of any
    /// length. No-op if running or not paused.
    pub fn resume(&self) {
        let now = self.shared.clock.now_ms();
        let resumed = {
            let mut state = lock(&self.shared.state);
            if state.running {
                false
            } else {
                match (state.paused_at_ms, state.target_at_ms) {
                    (Some(paused_at), Some(target_at)) => {
                        let paused_for = now.saturating_sub(paused_at);
                        state.target_at_ms = Some(target_at.saturating_add(paused_for));
                        state.paused_at_ms = None;
                        state.last_update_ms = now;
                        state.running = true;
                        true
                    }
                    _ => false,
                }
            }
        };
        if resumed {
            self.arm_active();
        }
    }

    /// Reset to idle and halt the loop. Always safe to call.
    pub fn stop(&self) {
        *lock(&self.shared.state) = EngineState::idle();
        self.halt_loop();
    }

    /// Stop and release all subscribers. After this returns no callback
    /// will fire.
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.shared.state);
            *state = EngineState::idle();
        }
        self.shared.callbacks.clear();
        self.halt_loop();
    }

    /// Recovery entry point: install timing state directly and resume the
    /// loop if the target lies in the future.
    pub fn set_target_time(
        &self,
        target_at_ms: u64,
        mode: TimerMode,
        started_at_ms: Option<u64>,
    ) {
        let now = self.shared.clock.now_ms();
        let run = target_at_ms > now;
        {
            let mut state = lock(&self.shared.state);
            state.mode = mode;
            state.target_at_ms = Some(target_at_ms);
            state.started_at_ms = Some(started_at_ms.unwrap_or(now));
            state.paused_at_ms = None;
            state.last_update_ms = now;
            state.running = run;
        }
        if run {
            self.arm_active();
        } else {
            self.halt_loop();
        }
    }

    /// Push the target further out.
    pub fn add_time(&self, ms: u64) {
        let mut state = lock(&self.shared.state);
        if let Some(target) = state.target_at_ms.as_mut() {
            *target = target.saturating_add(ms);
        }
    }

    /// Pull the target in, clamped so it never lands before `now()`.
    pub fn subtract_time(&self, ms: u64) {
        let now = self.shared.clock.now_ms();
        let mut state = lock(&self.shared.state);
        if let Some(target) = state.target_at_ms.as_mut() {
            *target = target.saturating_sub(ms).max(now);
        }
    }

    /// Compare `now()` against the expected next-tick time; on deviation
    /// beyond the threshold, report drift and force an immediate tick
    /// recomputation. The target is never adjusted: drift correction only
    /// affects when the next tick fires.
    pub fn check_and_correct_drift(&self) -> Option<i64> {
        let now = self.shared.clock.now_ms();
        let deviation = {
            let state = lock(&self.shared.state);
            if !state.running {
                return None;
            }
            let expected = state.last_update_ms + self.shared.config.nominal_interval_ms;
            now as i64 - expected as i64
        };
        if deviation.unsigned_abs() <= self.shared.config.drift_threshold_ms {
            return None;
        }
        // The forced tick stamps last_update, emits the drift report, and
        // completes the countdown if the clock jumped past the target.
        Self::run_tick(&self.shared);
        Some(deviation)
    }

    /// Switch the scheduling primitive without touching the countdown.
    pub fn set_strategy(&self, strategy: SchedulingStrategy) {
        if self.on_worker_thread() {
            tracing::warn!("ignoring strategy switch from inside a tick callback");
            return;
        }
        let running = lock(&self.shared.state).running;
        let mut bank = lock(&self.schedulers);
        if bank.strategy == strategy {
            return;
        }
        // Fully cancel the previous primitive before arming the new one so
        // a switch can never double-tick.
        bank.frame_paced.disarm();
        bank.interval.disarm();
        bank.strategy = strategy;
        if running {
            let tick = Self::make_tick(&self.shared);
            Self::arm_locked(&self.shared, &mut bank, tick);
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn on_worker_thread(&self) -> bool {
        *lock(&self.shared.worker_thread) == Some(std::thread::current().id())
    }

    /// Arm the active scheduler. Re-entrant calls from the worker thread
    /// leave the live loop in place; it picks up the new state on its next
    /// wakeup.
    fn arm_active(&self) {
        if self.on_worker_thread() {
            return;
        }
        let tick = Self::make_tick(&self.shared);
        let mut bank = lock(&self.schedulers);
        Self::arm_locked(&self.shared, &mut bank, tick);
    }

    fn arm_locked(shared: &Arc<Shared>, bank: &mut SchedulerBank, tick: TickFn) {
        let interval = Duration::from_millis(shared.config.nominal_interval_ms);
        let active = match bank.strategy {
            SchedulingStrategy::FramePaced => {
                bank.interval.disarm();
                &mut bank.frame_paced
            }
            SchedulingStrategy::Interval => {
                bank.frame_paced.disarm();
                &mut bank.interval
            }
        };
        active.arm(interval, tick);
        *lock(&shared.worker_thread) = active.worker_thread();
    }

    /// Halt scheduling. From the worker thread this is a no-op: the loop
    /// observes the non-running state on its next wakeup and exits without
    /// emitting anything.
    fn halt_loop(&self) {
        if self.on_worker_thread() {
            return;
        }
        let mut bank = lock(&self.schedulers);
        bank.frame_paced.disarm();
        bank.interval.disarm();
    }

    fn make_tick(shared: &Arc<Shared>) -> TickFn {
        let shared = Arc::clone(shared);
        Box::new(move || Self::run_tick(&shared))
    }

    /// One tick: recompute remaining, detect drift, fire callbacks.
    /// Returns whether the loop should stay armed.
    fn run_tick(shared: &Arc<Shared>) -> bool {
        let now = shared.clock.now_ms();
        let (remaining_ms, completed, drift) = {
            let mut state = lock(&shared.state);
            if !state.running {
                return false;
            }
            let expected = state.last_update_ms + shared.config.nominal_interval_ms;
            let deviation = now as i64 - expected as i64;
            let drift = (deviation.unsigned_abs() > shared.config.drift_threshold_ms)
                .then_some(deviation);
            state.last_update_ms = now;
            let remaining_ms = state
                .target_at_ms
                .map(|t| t.saturating_sub(now))
                .unwrap_or(0);
            let completed = remaining_ms == 0;
            if completed {
                // Settle state before any callback runs; a panicking or
                // re-entrant subscriber cannot produce a second completion.
                state.running = false;
            }
            (remaining_ms, completed, drift)
        };

        if let Some(deviation) = drift {
            tracing::debug!(deviation_ms = deviation, "tick drift detected");
            shared.callbacks.emit_drift(deviation);
        }
        if completed {
            shared.callbacks.emit_complete();
        } else {
            shared.callbacks.emit_tick(remaining_ms);
        }
        // A callback may have restarted or stopped the countdown; keep the
        // loop armed only if the engine is running now.
        lock(&shared.state).running
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}
