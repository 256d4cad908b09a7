//! Scheduling primitives for the timer engine.
//!
//! Two interchangeable strategies drive the tick loop:
//!
//! - [`FramePacedScheduler`] wakes at high frequency and throttles tick
//!   delivery to the nominal interval. Used while the host surface is
//!   visible, where tight pacing keeps the displayed countdown smooth.
//! - [`IntervalScheduler`] sleeps for the nominal interval between ticks.
//!   Used while hidden, or wherever frame pacing is unavailable.
//!
//! Both hide behind the [`Scheduler`] trait so the engine never knows which
//! primitive is armed. Switching strategies disarms the old primitive before
//! arming the new one; the target time is untouched, so a switch can neither
//! lose nor duplicate a countdown.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Periodic work driven by a scheduler.
///
/// Returns `true` to stay scheduled, `false` to halt the loop. Halting via
/// the return value lets a tick stop its own loop without joining itself.
pub type TickFn = Box<dyn FnMut() -> bool + Send + 'static>;

/// Which scheduling primitive drives the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// High-frequency wakeups throttled to the nominal interval.
    FramePaced,
    /// Plain periodic timer at the nominal interval.
    Interval,
}

/// A cancellable periodic callback source.
pub trait Scheduler: Send {
    /// Begin firing `tick` every `interval`. Arming while already armed
    /// replaces the previous schedule.
    fn arm(&mut self, interval: Duration, tick: TickFn);

    /// Cancel the pending schedule. Once this returns, no further tick will
    /// fire (unless called from inside a tick, in which case the loop ends
    /// as soon as that tick returns).
    fn disarm(&mut self);

    fn is_armed(&self) -> bool;

    /// Thread the armed schedule fires on, when it has one. The engine uses
    /// this to recognize re-entrant calls made from inside a tick.
    fn worker_thread(&self) -> Option<std::thread::ThreadId> {
        None
    }
}

/// Wakeup granularity of the frame-paced strategy, roughly one display frame.
const FRAME_SLICE: Duration = Duration::from_millis(16);

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(body: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || body(stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the worker and wait for it to finish. Joining is skipped when
    /// called from the worker thread itself (a tick re-arming its own
    /// scheduler), which would otherwise deadlock; the loop still terminates
    /// because the stop signal is already queued.
    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.thread().id() != std::thread::current().id() {
            if self.handle.join().is_err() {
                tracing::error!("scheduler worker thread panicked");
            }
        }
    }
}

/// Frame-paced scheduler: wakes every [`FRAME_SLICE`] and fires the tick
/// only once the nominal interval has elapsed since the previous fire.
pub struct FramePacedScheduler {
    worker: Option<Worker>,
}

impl FramePacedScheduler {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for FramePacedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FramePacedScheduler {
    fn arm(&mut self, interval: Duration, mut tick: TickFn) {
        self.disarm();
        self.worker = Some(Worker::spawn(move |stop_rx| {
            let mut last_fire = Instant::now();
            loop {
                match stop_rx.recv_timeout(FRAME_SLICE) {
                    Err(RecvTimeoutError::Timeout) => {
                        if last_fire.elapsed() >= interval {
                            last_fire = Instant::now();
                            if !tick() {
                                break;
                            }
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }));
    }

    fn disarm(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_armed(&self) -> bool {
        self.worker.is_some()
    }

    fn worker_thread(&self) -> Option<std::thread::ThreadId> {
        self.worker.as_ref().map(|w| w.handle.thread().id())
    }
}

impl Drop for FramePacedScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Interval scheduler: sleeps the full interval between ticks.
pub struct IntervalScheduler {
    worker: Option<Worker>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for IntervalScheduler {
    fn arm(&mut self, interval: Duration, mut tick: TickFn) {
        self.disarm();
        self.worker = Some(Worker::spawn(move |stop_rx| loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if !tick() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }));
    }

    fn disarm(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_armed(&self) -> bool {
        self.worker.is_some()
    }

    fn worker_thread(&self) -> Option<std::thread::ThreadId> {
        self.worker.as_ref().map(|w| w.handle.thread().id())
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Test scheduler driven by explicit [`ManualScheduler::fire`] calls.
///
/// Cloning shares the underlying slot, so a clone handed to the engine can
/// be fired from the test.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct ManualScheduler {
    slot: std::sync::Arc<std::sync::Mutex<Option<TickFn>>>,
}

#[cfg(test)]
impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            slot: std::sync::Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Fire one tick. Returns `false` if nothing is armed or the tick asked
    /// to halt. The tick runs outside the slot lock so it may re-arm.
    pub fn fire(&self) -> bool {
        let taken = self.slot.lock().unwrap().take();
        let Some(mut tick) = taken else {
            return false;
        };
        let keep = tick();
        let mut slot = self.slot.lock().unwrap();
        if keep && slot.is_none() {
            *slot = Some(tick);
        }
        keep
    }
}

#[cfg(test)]
impl Scheduler for ManualScheduler {
    fn arm(&mut self, _interval: Duration, tick: TickFn) {
        *self.slot.lock().unwrap() = Some(tick);
    }

    fn disarm(&mut self) {
        *self.slot.lock().unwrap() = None;
    }

    fn is_armed(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}
