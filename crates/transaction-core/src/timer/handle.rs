//! One-shot cancellable timer.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// A scheduled callback that runs at most once.
///
/// Firing and cancellation race on a single atomic, so once [`Timer::cancel`]
/// returns `true` the callback is guaranteed never to run. A timer cannot be
/// re-armed; schedule a new one instead. Dropping the handle cancels it.
///
/// Must be created from within a tokio runtime.
pub struct Timer {
    label: String,
    duration: Duration,
    deadline: Instant,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl Timer {
    /// Schedules `callback` to run once `duration` has elapsed.
    ///
    /// A zero duration fires as soon as the runtime polls the timer task.
    pub fn schedule<F>(label: impl Into<String>, duration: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let state = Arc::new(AtomicU8::new(ARMED));
        let deadline = Instant::now() + duration;

        let task_state = state.clone();
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                trace!(timer = %task_label, "Timer fired");
                callback();
            }
        });

        Self { label, duration, deadline, state, task }
    }

    /// Cancels the timer. Returns `true` if this call prevented the callback
    /// from running, `false` if it had already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.task.abort();
        }
        cancelled
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            ARMED => "armed",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_struct("Timer")
            .field("label", &self.label)
            .field("duration", &self.duration)
            .field("state", &state)
            .finish()
    }
}
