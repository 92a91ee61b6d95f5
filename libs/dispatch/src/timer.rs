//! Periodic timers serviced by a worker loop
//!
//! Timers are not self-driving: the owning worker checks [`TimerSet`]
//! between tasks and sleeps no longer than the earliest deadline. Callbacks
//! always run on the worker thread, outside the timer lock.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub(crate) type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct TimerEntry {
    id: u64,
    period: Duration,
    next_due: Instant,
    callback: TimerCallback,
}

/// Timers registered on one worker thread
#[derive(Default)]
pub(crate) struct TimerSet {
    entries: Vec<TimerEntry>,
    next_id: u64,
}

impl TimerSet {
    pub(crate) fn insert(&mut self, period: Duration, callback: TimerCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(TimerEntry {
            id,
            period,
            next_due: Instant::now() + period,
            callback,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.next_due).min()
    }

    /// Collect callbacks due at `now` and re-arm them
    ///
    /// A timer that fell more than one period behind skips the missed
    /// ticks instead of firing in a burst.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next_due <= now {
                due.push(Arc::clone(&entry.callback));
                entry.next_due += entry.period;
                if entry.next_due <= now {
                    entry.next_due = now + entry.period;
                }
            }
        }
        due
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle to a periodic timer on a worker thread
///
/// Dropping the handle cancels the timer. Once the worker thread exits the
/// handle is inert.
pub struct TimerHandle {
    id: u64,
    timers: Weak<Mutex<TimerSet>>,
}

impl TimerHandle {
    pub(crate) fn new(id: u64, timers: &Arc<Mutex<TimerSet>>) -> Self {
        Self {
            id,
            timers: Arc::downgrade(timers),
        }
    }

    /// Stop the timer. Returns `false` if it was already stopped.
    pub fn cancel(&self) -> bool {
        match self.timers.upgrade() {
            Some(timers) => timers.lock().remove(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.timers
            .upgrade()
            .map(|timers| timers.lock().contains(self.id))
            .unwrap_or(false)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
