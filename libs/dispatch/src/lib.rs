//! Thread-Affine Dispatch
//!
//! Moves units of work onto designated worker threads so a caller perceives
//! a normal function call while the body runs elsewhere.
//!
//! ## Building blocks
//!
//! - [`TaskQueue`]: bounded priority queue with backpressure
//! - [`WorkerThread`]: dedicated OS thread draining one queue, with timers
//!   and an optional liveness [`Watchdog`]
//! - [`Delegate`] / [`WaitDelegate`]: callable targets bound to a thread
//! - [`Signal`]: multi-subscriber notifications with weak subscription tokens
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch::{Delegate, QueueConfig, ShutdownMode, ThreadAdapter, WorkerThread};
//! use std::sync::Arc;
//!
//! let worker = WorkerThread::spawn("ui", QueueConfig::bounded(64))?;
//! let adapter: Arc<dyn ThreadAdapter> = Arc::new(worker.clone());
//! let show = Delegate::new(adapter, |text: String| println!("{text}"));
//! show.invoke("hello from another thread".to_string())?;
//! worker.shutdown(ShutdownMode::Drain)?;
//! # Ok::<(), dispatch::DispatchError>(())
//! ```

pub mod delegate;
pub mod error;
pub mod queue;
pub mod signal;
pub mod task;
pub mod thread;
pub mod timer;
pub mod watchdog;

pub use delegate::{Delegate, InvocationMessage, WaitDelegate, DEFAULT_WAIT_TIMEOUT};
pub use error::{DispatchError, Result};
pub use queue::{Dequeued, FullPolicy, QueueConfig, ShutdownMode, TaskQueue};
pub use signal::{Connection, ScopedConnection, Signal};
pub use task::{Priority, Task};
pub use thread::{ThreadAdapter, WorkerThread, DEFAULT_IDLE_POLL};
pub use timer::TimerHandle;
pub use watchdog::{Heartbeat, StallEvent, Watchdog, WatchdogConfig};
