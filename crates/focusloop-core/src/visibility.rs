//! Visibility coordination.
//!
//! The host platform provides a boolean "is the surface visible" signal with
//! a change event. The coordinator subscribes to it for the lifetime of the
//! engine: going hidden switches the engine to the plain interval strategy,
//! regaining visibility switches back to frame pacing and immediately runs
//! drift correction so the displayed time never visibly jumps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::timer::{SchedulingStrategy, TimerEngine};

/// Identifies one visibility subscription, for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type VisibilityListener = Box<dyn Fn(bool) + Send + Sync>;

/// Platform-provided visibility signal.
pub trait VisibilitySource: Send + Sync {
    fn is_visible(&self) -> bool;

    /// Register a change listener, invoked with the new visibility.
    fn subscribe(&self, listener: VisibilityListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// In-process visibility source, driven by explicit [`set_visible`] calls.
/// Serves headless hosts and tests.
///
/// [`set_visible`]: ManualVisibility::set_visible
pub struct ManualVisibility {
    visible: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, VisibilityListener>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualVisibility {
    pub fn new(visible: bool) -> Arc<Self> {
        Arc::new(Self {
            visible: AtomicBool::new(visible),
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    /// Flip visibility and notify listeners of an actual change.
    pub fn set_visible(&self, visible: bool) {
        let previous = self.visible.swap(visible, Ordering::SeqCst);
        if previous == visible {
            return;
        }
        let listeners = lock(&self.listeners);
        for listener in listeners.values() {
            listener(visible);
        }
    }
}

impl VisibilitySource for ManualVisibility {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: VisibilityListener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).insert(id, listener);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.listeners).remove(&id.0);
    }
}

/// Connects a [`VisibilitySource`] to a [`TimerEngine`]'s scheduling
/// strategy. Subscribes on construction, unsubscribes on drop; the engine's
/// countdown state is never touched, only how its next tick is scheduled.
pub struct VisibilityCoordinator {
    source: Arc<dyn VisibilitySource>,
    subscription: SubscriptionId,
}

impl VisibilityCoordinator {
    pub fn new(engine: Arc<TimerEngine>, source: Arc<dyn VisibilitySource>) -> Self {
        let initial = source.is_visible();
        Self::apply(&engine, initial);

        let subscription = source.subscribe(Box::new(move |visible| {
            tracing::debug!(visible, "visibility changed");
            Self::apply(&engine, visible);
        }));

        Self {
            source,
            subscription,
        }
    }

    fn apply(engine: &TimerEngine, visible: bool) {
        if visible {
            engine.set_strategy(SchedulingStrategy::FramePaced);
            // A backgrounded or sleeping host can leave a large tick gap;
            // recompute now rather than waiting for the next tick.
            if let Some(deviation_ms) = engine.check_and_correct_drift() {
                tracing::info!(deviation_ms, "corrected drift on visibility regain");
            }
        } else {
            engine.set_strategy(SchedulingStrategy::Interval);
        }
    }
}

impl Drop for VisibilityCoordinator {
    fn drop(&mut self) {
        self.source.unsubscribe(self.subscription);
    }
}
