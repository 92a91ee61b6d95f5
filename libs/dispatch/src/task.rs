//! Units of cross-thread work
//!
//! A [`Task`] owns everything it needs to run: the closure captures the
//! target and the argument values by move, so nothing in it borrows from the
//! producer's stack frame. The `Send + 'static` bound on the closure is what
//! enforces that at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Scheduling priority of a task on its destination thread
///
/// Ordered lowest to highest, so `Priority::Critical > Priority::Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Background work (bulk transfers, housekeeping)
    Low,
    /// Normal priority (default)
    Normal,
    /// Latency-sensitive work
    High,
    /// System traffic that must overtake everything else
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// Rank used by the queue heap. Rank 0 is reserved for the drain sentinel.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// One pending unit of work for a destination thread
pub struct Task {
    priority: Priority,
    work: Box<dyn FnOnce() + Send + 'static>,
    created_at: Instant,
}

impl Task {
    /// Create a task from a closure that owns its arguments
    pub fn new<F>(priority: Priority, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            priority,
            work: Box::new(work),
            created_at: Instant::now(),
        }
    }

    /// Create a normal-priority task
    pub fn normal<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(Priority::Normal, work)
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Time since the task was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Consume the task. Only the destination thread's loop calls this.
    pub(crate) fn run(self) {
        (self.work)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("priority", &self.priority)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
