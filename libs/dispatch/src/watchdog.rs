//! Worker Liveness Watchdog
//!
//! The worker loop touches a [`Heartbeat`] on every iteration, and a timer on
//! the worker guarantees an iteration at least every `check_interval` even
//! when no tasks arrive. A separate monitor thread compares the time since
//! the last touch against `timeout` and emits a [`StallEvent`] when it is
//! exceeded. The watchdog is advisory: it reports, it never restarts.

use crate::signal::Signal;
use crate::timer::TimerHandle;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Maximum time the loop may go without an iteration
    pub timeout_ms: u64,
    /// How often the heartbeat timer fires and the monitor checks
    pub check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            check_interval_ms: 250,
        }
    }
}

impl WatchdogConfig {
    pub fn new(timeout: Duration) -> Self {
        let check = (timeout / 4).max(Duration::from_millis(1));
        Self {
            timeout_ms: timeout.as_millis() as u64,
            check_interval_ms: check.as_millis() as u64,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

/// "Last alive" timestamp shared between a worker and its watchdog
#[derive(Debug)]
pub struct Heartbeat {
    epoch: Instant,
    last_alive_ns: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_alive_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn touch(&self) {
        let ns = self.epoch.elapsed().as_nanos() as u64;
        self.last_alive_ns.store(ns, Ordering::Release);
    }

    /// Time since the last touch
    pub fn since_last(&self) -> Duration {
        let last = Duration::from_nanos(self.last_alive_ns.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised when a worker loop has not iterated within the timeout
#[derive(Debug, Clone)]
pub struct StallEvent {
    pub thread: String,
    pub stalled_for: Duration,
    pub timeout: Duration,
}

/// Running watchdog for one worker thread
///
/// Dropping the watchdog stops the monitor thread and the heartbeat timer.
pub struct Watchdog {
    stalled: Signal<StallEvent>,
    stop_tx: Option<Sender<()>>,
    monitor: Option<JoinHandle<()>>,
    _heartbeat_timer: TimerHandle,
}

impl Watchdog {
    pub(crate) fn spawn(
        thread: String,
        heartbeat: Arc<Heartbeat>,
        heartbeat_timer: TimerHandle,
        config: WatchdogConfig,
    ) -> std::io::Result<Self> {
        let stalled = Signal::new();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let signal = stalled.clone();
        let timeout = config.timeout();
        let interval = config.check_interval();
        let name = format!("{}-watchdog", thread);

        let monitor = std::thread::Builder::new().name(name).spawn(move || {
            info!(thread = %thread, timeout_ms = timeout.as_millis() as u64, "Watchdog started");
            let mut reported = false;
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let stalled_for = heartbeat.since_last();
                if stalled_for > timeout {
                    if !reported {
                        error!(
                            thread = %thread,
                            stalled_ms = stalled_for.as_millis() as u64,
                            "Worker loop stalled"
                        );
                        signal.emit(&StallEvent {
                            thread: thread.clone(),
                            stalled_for,
                            timeout,
                        });
                        reported = true;
                    }
                } else if reported {
                    info!(thread = %thread, "Worker loop recovered");
                    reported = false;
                }
            }
        })?;

        Ok(Self {
            stalled,
            stop_tx: Some(stop_tx),
            monitor: Some(monitor),
            _heartbeat_timer: heartbeat_timer,
        })
    }

    /// Signal emitted once per stall episode
    pub fn stalled(&self) -> &Signal<StallEvent> {
        &self.stalled
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the monitor immediately.
        self.stop_tx.take();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
