//! Worker Threads
//!
//! A [`WorkerThread`] is one dedicated OS thread running a single-consumer
//! loop over its [`TaskQueue`]. Tasks run strictly one at a time, highest
//! priority first. Any thread may enqueue; only the worker executes.
//!
//! # Loop iteration
//!
//! 1. Run timer callbacks that are due
//! 2. Touch the heartbeat
//! 3. Wait for a task until the earliest timer deadline (or the idle poll)
//! 4. Run the task, or return on the exit sentinel
//!
//! A task that panics is caught and logged; the loop keeps running.

use crate::error::{DispatchError, Result};
use crate::queue::{Dequeued, FullPolicy, QueueConfig, ShutdownMode, TaskQueue};
use crate::task::{Priority, Task};
use crate::timer::{TimerHandle, TimerSet};
use crate::watchdog::{Heartbeat, Watchdog, WatchdogConfig};
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest the loop sleeps without a task or timer
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);

/// "Enqueue a task for later execution on this thread"
///
/// Implemented by [`WorkerThread`]; other runtimes (UI event loops, RTOS
/// queues) plug in by implementing the same contract.
pub trait ThreadAdapter: Send + Sync {
    /// Thread name for logs and errors
    fn name(&self) -> &str;

    /// Queue `task` for execution on this thread. Safe to call from any thread.
    fn enqueue(&self, task: Task) -> Result<()>;

    /// Whether the caller is already running on this thread
    fn is_current(&self) -> bool;

    /// Identity key; two adapters with the same key drive the same thread
    fn key(&self) -> usize;
}

struct Shared {
    name: String,
    queue: TaskQueue,
    timers: Arc<Mutex<TimerSet>>,
    heartbeat: Arc<Heartbeat>,
    thread_id: OnceLock<ThreadId>,
    join: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<Watchdog>>,
}

/// Handle to a dedicated worker thread
///
/// Cloning the handle is cheap; all clones drive the same thread. The
/// thread runs until [`WorkerThread::shutdown`] is called.
#[derive(Clone)]
pub struct WorkerThread {
    inner: Arc<Shared>,
}

impl WorkerThread {
    /// Spawn a new worker thread with its own queue
    pub fn spawn(name: impl Into<String>, config: QueueConfig) -> Result<Self> {
        let name = name.into();
        let inner = Arc::new(Shared {
            queue: TaskQueue::new(name.clone(), config),
            name: name.clone(),
            timers: Arc::new(Mutex::new(TimerSet::default())),
            heartbeat: Arc::new(Heartbeat::new()),
            thread_id: OnceLock::new(),
            join: Mutex::new(None),
            watchdog: Mutex::new(None),
        });

        let worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&worker))
            .map_err(|source| DispatchError::Spawn {
                thread: name.clone(),
                source,
            })?;

        let _ = inner.thread_id.set(handle.thread().id());
        *inner.join.lock() = Some(handle);

        info!(thread = %name, "Worker thread started");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the caller is running on this worker
    pub fn is_current(&self) -> bool {
        self.inner.thread_id.get() == Some(&std::thread::current().id())
    }

    /// Whether the queue still accepts tasks
    pub fn is_running(&self) -> bool {
        self.inner.queue.is_accepting()
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue a task
    ///
    /// From the worker itself a full queue fails instead of blocking, since
    /// the only thread that could free a slot is the one that would block.
    pub fn enqueue(&self, task: Task) -> Result<()> {
        if self.is_current() {
            self.inner.queue.push_with(task, FullPolicy::Fail)
        } else {
            self.inner.queue.push(task)
        }
    }

    /// Queue a closure at `priority`
    pub fn post<F>(&self, priority: Priority, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::new(priority, work))
    }

    /// Run `work` on this thread and block until it returns or `timeout` elapses
    ///
    /// Runs inline when called from the worker itself. After a timeout the
    /// closure may still run later; its result is discarded.
    pub fn invoke_wait<F, R>(&self, priority: Priority, timeout: Duration, work: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        call_and_wait(self, priority, timeout, work)
    }

    /// Run `callback` every `period` on this thread
    pub fn add_timer<F>(&self, period: Duration, callback: F) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.timers.lock().insert(period, Arc::new(callback));
        self.inner.queue.wake();
        TimerHandle::new(id, &self.inner.timers)
    }

    /// Start a liveness watchdog for this thread
    ///
    /// Replaces any watchdog already running. The returned signal emits
    /// once per stall episode.
    pub fn start_watchdog(&self, config: WatchdogConfig) -> Result<crate::Signal<crate::StallEvent>> {
        let heartbeat = Arc::clone(&self.inner.heartbeat);
        let touch = Arc::clone(&heartbeat);
        let timer = self.add_timer(config.check_interval(), move || touch.touch());

        let watchdog = Watchdog::spawn(self.inner.name.clone(), heartbeat, timer, config)
            .map_err(|source| DispatchError::Spawn {
                thread: format!("{}-watchdog", self.inner.name),
                source,
            })?;
        let stalled = watchdog.stalled().clone();
        *self.inner.watchdog.lock() = Some(watchdog);
        Ok(stalled)
    }

    /// Stop the watchdog, if one is running
    pub fn stop_watchdog(&self) {
        self.inner.watchdog.lock().take();
    }

    /// Time since the loop last completed an iteration
    pub fn since_last_alive(&self) -> Duration {
        self.inner.heartbeat.since_last()
    }

    /// Enqueue the exit sentinel and wait for the loop to return
    ///
    /// Called from the worker itself, this only closes the queue; the loop
    /// exits after the current task.
    pub fn shutdown(&self, mode: ShutdownMode) -> Result<()> {
        if self.inner.queue.close(mode) {
            info!(thread = %self.inner.name, ?mode, "Worker thread shutdown requested");
        }
        self.stop_watchdog();

        if self.is_current() {
            warn!(thread = %self.inner.name, "shutdown called from the worker itself; not joining");
            return Ok(());
        }

        let handle = self.inner.join.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| DispatchError::TaskPanicked {
                thread: self.inner.name.clone(),
            })?;
        }
        Ok(())
    }
}

impl ThreadAdapter for WorkerThread {
    fn name(&self) -> &str {
        WorkerThread::name(self)
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        WorkerThread::enqueue(self, task)
    }

    fn is_current(&self) -> bool {
        WorkerThread::is_current(self)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.queue.len())
            .field("timers", &self.inner.timers.lock().len())
            .field("running", &self.inner.queue.is_accepting())
            .finish()
    }
}

fn run_loop(shared: &Shared) {
    debug!(thread = %shared.name, "Worker loop entered");
    let mut executed: u64 = 0;

    loop {
        let now = Instant::now();
        let due = shared.timers.lock().take_due(now);
        for callback in due {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(thread = %shared.name, "Timer callback panicked");
            }
        }

        shared.heartbeat.touch();

        let idle_deadline = now + DEFAULT_IDLE_POLL;
        let deadline = match shared.timers.lock().next_deadline() {
            Some(next) => next.min(idle_deadline),
            None => idle_deadline,
        };

        match shared.queue.pop(Some(deadline)) {
            Dequeued::Task(task) => {
                if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                    error!(thread = %shared.name, "Task panicked; worker loop continues");
                }
                executed += 1;
            }
            Dequeued::Idle => {}
            Dequeued::Exit => break,
        }
    }

    let discarded = shared.queue.clear();
    shared.timers.lock().clear();
    info!(
        thread = %shared.name,
        executed,
        discarded,
        "Worker thread exited"
    );
}

/// Run `work` on `thread`, blocking the caller for the result
pub(crate) fn call_and_wait<F, R>(
    thread: &dyn ThreadAdapter,
    priority: Priority,
    timeout: Duration,
    work: F,
) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if thread.is_current() {
        return catch_unwind(AssertUnwindSafe(work)).map_err(|_| DispatchError::TaskPanicked {
            thread: thread.name().to_string(),
        });
    }

    let (tx, rx) = bounded(1);
    thread.enqueue(Task::new(priority, move || {
        let outcome = catch_unwind(AssertUnwindSafe(work));
        let _ = tx.send(outcome);
    }))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(DispatchError::TaskPanicked {
            thread: thread.name().to_string(),
        }),
        Err(RecvTimeoutError::Timeout) => Err(DispatchError::timeout(
            format!("call on {}", thread.name()),
            timeout.as_millis() as u64,
        )),
        // Task dropped unexecuted by a discarding shutdown.
        Err(RecvTimeoutError::Disconnected) => Err(DispatchError::thread_stopped(thread.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_run_on_worker_thread() {
        let worker = WorkerThread::spawn("unit-worker", QueueConfig::default()).unwrap();
        let expected = worker.inner.thread_id.get().copied().unwrap();

        let observed = worker
            .invoke_wait(Priority::Normal, Duration::from_secs(1), || std::thread::current().id())
            .unwrap();
        assert_eq!(observed, expected);
        assert_ne!(observed, std::thread::current().id());

        worker.shutdown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn test_invoke_wait_inline_on_same_thread() {
        let worker = WorkerThread::spawn("inline-worker", QueueConfig::default()).unwrap();
        let inner = worker.clone();

        let nested = worker
            .invoke_wait(Priority::Normal, Duration::from_secs(1), move || {
                inner
                    .invoke_wait(Priority::Normal, Duration::from_millis(10), || 7)
                    .unwrap()
            })
            .unwrap();
        assert_eq!(nested, 7);

        worker.shutdown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn test_panicking_task_does_not_kill_loop() {
        let worker = WorkerThread::spawn("panic-worker", QueueConfig::default()).unwrap();

        let result = worker.invoke_wait(Priority::Normal, Duration::from_secs(1), || -> u8 {
            panic!("boom")
        });
        assert!(matches!(result, Err(DispatchError::TaskPanicked { .. })));

        let after = worker
            .invoke_wait(Priority::Normal, Duration::from_secs(1), || 5)
            .unwrap();
        assert_eq!(after, 5);

        worker.shutdown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn test_timer_fires_on_worker() {
        let worker = WorkerThread::spawn("timer-worker", QueueConfig::default()).unwrap();
        let expected = worker.inner.thread_id.get().copied().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let wrong_thread = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let wrong = Arc::clone(&wrong_thread);
        let timer = worker.add_timer(Duration::from_millis(10), move || {
            if std::thread::current().id() != expected {
                wrong.fetch_add(1, Ordering::SeqCst);
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(120));
        timer.cancel();
        let fired = hits.load(Ordering::SeqCst);
        assert!(fired >= 3, "timer fired only {} times", fired);
        assert_eq!(wrong_thread.load(Ordering::SeqCst), 0);
        assert_eq!(worker.inner.timers.lock().len(), 0);

        worker.shutdown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn test_heartbeat_age_tracks_blocked_task() {
        let worker = WorkerThread::spawn("heartbeat-worker", QueueConfig::default()).unwrap();
        worker
            .post(Priority::Normal, || std::thread::sleep(Duration::from_millis(150)))
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(worker.since_last_alive() >= Duration::from_millis(80));

        worker
            .invoke_wait(Priority::Normal, Duration::from_secs(1), || ())
            .unwrap();
        assert!(worker.since_last_alive() < Duration::from_millis(100));

        worker.shutdown(ShutdownMode::Drain).unwrap();
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let worker = WorkerThread::spawn("stopped-worker", QueueConfig::default()).unwrap();
        worker.shutdown(ShutdownMode::Drain).unwrap();

        assert!(!worker.is_running());
        let err = worker.post(Priority::Normal, || {}).unwrap_err();
        assert!(matches!(err, DispatchError::ThreadStopped { .. }));
    }
}
