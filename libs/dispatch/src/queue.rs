//! Bounded Priority Task Queue
//!
//! Multi-producer, single-consumer queue behind one `parking_lot` mutex and
//! two condition variables (`not_empty` for the consumer, `not_full` for
//! producers blocked by backpressure).
//!
//! Ordering is highest priority first. Equal priorities keep arrival order
//! through a per-queue generation counter, the same tie-break the
//! scheduler's timed lane uses for equal deadlines.

use crate::error::{DispatchError, Result};
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// What `push` does when the queue is at `max_depth`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FullPolicy {
    /// Block the producer until the consumer frees a slot
    Block,
    /// Return `DispatchError::QueueFull` immediately
    Fail,
}

impl Default for FullPolicy {
    fn default() -> Self {
        Self::Block
    }
}

/// How the exit sentinel is ordered against work already queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownMode {
    /// Run every accepted task, then exit
    Drain,
    /// Exit as soon as the current task finishes, dropping the rest unexecuted
    Discard,
}

impl Default for ShutdownMode {
    fn default() -> Self {
        Self::Drain
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending tasks (0 = unbounded)
    pub max_depth: usize,
    /// Behavior when `max_depth` is reached
    pub full_policy: FullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 0,
            full_policy: FullPolicy::Block,
        }
    }
}

impl QueueConfig {
    /// Unbounded queue
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounded queue that blocks producers when full
    pub fn bounded(max_depth: usize) -> Self {
        Self {
            max_depth,
            full_policy: FullPolicy::Block,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set full-queue policy
    pub fn with_full_policy(mut self, policy: FullPolicy) -> Self {
        self.full_policy = policy;
        self
    }
}

/// Result of one consumer wait
#[derive(Debug)]
pub enum Dequeued {
    /// Highest-priority pending task
    Task(Task),
    /// Exit sentinel reached; the loop must return
    Exit,
    /// Deadline passed with nothing to run
    Idle,
}

enum Slot {
    Task(Task),
    Exit,
}

struct Entry {
    rank: u8,
    generation: u64,
    slot: Slot,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap on rank; lower generation (earlier arrival) wins ties.
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.generation == other.generation
    }
}

impl Eq for Entry {}

struct State {
    heap: BinaryHeap<Entry>,
    next_generation: u64,
    /// Task entries only; the sentinel does not count against `max_depth`
    tasks: usize,
    accepting: bool,
}

/// Thread-safe priority queue feeding one consumer loop
pub struct TaskQueue {
    name: String,
    config: QueueConfig,
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl TaskQueue {
    /// Create a new queue; `name` is used in errors and logs
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_generation: 0,
                tasks: 0,
                accepting: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue with the configured full-queue policy
    pub fn push(&self, task: Task) -> Result<()> {
        self.push_with(task, self.config.full_policy)
    }

    /// Enqueue with an explicit full-queue policy
    pub fn push_with(&self, task: Task, policy: FullPolicy) -> Result<()> {
        let mut state = self.state.lock();
        loop {
            if !state.accepting {
                return Err(DispatchError::thread_stopped(&self.name));
            }
            if self.config.max_depth == 0 || state.tasks < self.config.max_depth {
                break;
            }
            match policy {
                FullPolicy::Fail => {
                    return Err(DispatchError::queue_full(&self.name, self.config.max_depth));
                }
                FullPolicy::Block => self.not_full.wait(&mut state),
            }
        }

        state
            .heap
            .try_reserve(1)
            .map_err(|e| DispatchError::allocation(format!("queue {}: {}", self.name, e)))?;

        let generation = state.next_generation;
        state.next_generation += 1;
        state.heap.push(Entry {
            rank: task.priority().rank(),
            generation,
            slot: Slot::Task(task),
        });
        state.tasks += 1;
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Stop accepting work and enqueue the exit sentinel
    ///
    /// Returns `false` if the queue was already closed. Producers blocked on
    /// a full queue wake up and fail with `ThreadStopped`.
    pub fn close(&self, mode: ShutdownMode) -> bool {
        let mut state = self.state.lock();
        if !state.accepting {
            return false;
        }
        state.accepting = false;

        let rank = match mode {
            ShutdownMode::Drain => 0,
            ShutdownMode::Discard => u8::MAX,
        };
        let generation = state.next_generation;
        state.next_generation += 1;
        state.heap.push(Entry {
            rank,
            generation,
            slot: Slot::Exit,
        });
        drop(state);

        self.not_full.notify_all();
        self.not_empty.notify_all();
        true
    }

    /// Wait for the next entry, up to `deadline` if one is given
    pub fn pop(&self, deadline: Option<Instant>) -> Dequeued {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return match entry.slot {
                    Slot::Task(task) => {
                        state.tasks -= 1;
                        drop(state);
                        self.not_full.notify_one();
                        Dequeued::Task(task)
                    }
                    Slot::Exit => Dequeued::Exit,
                };
            }

            match deadline {
                None => self.not_empty.wait(&mut state),
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut state, deadline).timed_out()
                        && state.heap.is_empty()
                    {
                        return Dequeued::Idle;
                    }
                }
            }
        }
    }

    /// Wake the consumer so it recomputes its wait deadline
    pub fn wake(&self) {
        self.not_empty.notify_one();
    }

    /// Drop every pending task unexecuted, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.tasks;
        state.heap.clear();
        state.tasks = 0;
        drop(state);
        self.not_full.notify_all();
        dropped
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.state.lock().tasks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn labelled(priority: Priority, label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Task {
        let log = Arc::clone(log);
        Task::new(priority, move || log.lock().push(label))
    }

    fn drain(queue: &TaskQueue) {
        while let Dequeued::Task(task) = queue.pop(Some(Instant::now())) {
            task.run();
        }
    }

    #[test]
    fn test_priority_then_arrival_order() {
        let queue = TaskQueue::new("q", QueueConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.push(labelled(Priority::Low, "low", &log)).unwrap();
        queue.push(labelled(Priority::High, "high-1", &log)).unwrap();
        queue.push(labelled(Priority::Normal, "normal", &log)).unwrap();
        queue.push(labelled(Priority::High, "high-2", &log)).unwrap();

        drain(&queue);
        assert_eq!(*log.lock(), vec!["high-1", "high-2", "normal", "low"]);
    }

    #[test]
    fn test_fail_policy_rejects_when_full() {
        let queue = TaskQueue::new(
            "bounded",
            QueueConfig::bounded(2).with_full_policy(FullPolicy::Fail),
        );
        queue.push(Task::normal(|| {})).unwrap();
        queue.push(Task::normal(|| {})).unwrap();

        let err = queue.push(Task::normal(|| {})).unwrap_err();
        assert!(matches!(err, DispatchError::QueueFull { depth: 2, .. }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_block_policy_waits_for_consumer() {
        let queue = Arc::new(TaskQueue::new("bounded", QueueConfig::bounded(2)));
        queue.push(Task::normal(|| {})).unwrap();
        queue.push(Task::normal(|| {})).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.push(Task::normal(|| {})).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "producer should be blocked");

        assert!(matches!(queue.pop(None), Dequeued::Task(_)));
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_close_rejects_new_work_and_wakes_blocked_producer() {
        let queue = Arc::new(TaskQueue::new("bounded", QueueConfig::bounded(1)));
        queue.push(Task::normal(|| {})).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(Task::normal(|| {})))
        };
        thread::sleep(Duration::from_millis(20));

        assert!(queue.close(ShutdownMode::Drain));
        assert!(!queue.close(ShutdownMode::Drain));

        let result = producer.join().unwrap();
        assert!(matches!(result, Err(DispatchError::ThreadStopped { .. })));
        assert!(matches!(
            queue.push(Task::normal(|| {})),
            Err(DispatchError::ThreadStopped { .. })
        ));
    }

    #[test]
    fn test_drain_sentinel_comes_after_pending_tasks() {
        let queue = TaskQueue::new("q", QueueConfig::default());
        queue.push(Task::new(Priority::Low, || {})).unwrap();
        queue.push(Task::new(Priority::Critical, || {})).unwrap();
        queue.close(ShutdownMode::Drain);

        assert!(matches!(queue.pop(None), Dequeued::Task(_)));
        assert!(matches!(queue.pop(None), Dequeued::Task(_)));
        assert!(matches!(queue.pop(None), Dequeued::Exit));
    }

    #[test]
    fn test_discard_sentinel_jumps_the_queue() {
        let queue = TaskQueue::new("q", QueueConfig::default());
        queue.push(Task::new(Priority::Critical, || {})).unwrap();
        queue.close(ShutdownMode::Discard);

        assert!(matches!(queue.pop(None), Dequeued::Exit));
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out_when_idle() {
        let queue = TaskQueue::new("q", QueueConfig::default());
        let started = Instant::now();
        let result = queue.pop(Some(started + Duration::from_millis(20)));
        assert!(matches!(result, Dequeued::Idle));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
