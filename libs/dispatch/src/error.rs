//! Dispatch Error Types
//!
//! Errors raised on the calling side of a cross-thread hop. Nothing in this
//! crate propagates an error across a thread boundary: failures that happen
//! on the destination thread are logged there or surfaced through a signal.

use thiserror::Error;

/// Main dispatch error type
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Bounded queue is full and the queue was configured to fail fast
    #[error("Queue full: {thread} is at its maximum depth of {depth} tasks")]
    QueueFull { thread: String, depth: usize },

    /// Memory for a task or its arguments could not be obtained
    #[error("Allocation failed: {context}")]
    Allocation { context: String },

    /// Destination thread has exited or is shutting down
    #[error("Thread stopped: {thread} no longer accepts tasks")]
    ThreadStopped { thread: String },

    /// Delegate has no bound target
    #[error("Delegate has no target")]
    EmptyTarget,

    /// Blocking call did not complete in time
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Target panicked while running on the destination thread
    #[error("Task panicked on thread {thread}")]
    TaskPanicked { thread: String },

    /// OS refused to create the worker thread
    #[error("Failed to spawn thread {thread}: {source}")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// Create a queue-full error
    pub fn queue_full(thread: impl Into<String>, depth: usize) -> Self {
        Self::QueueFull {
            thread: thread.into(),
            depth,
        }
    }

    /// Create an allocation error
    pub fn allocation(context: impl Into<String>) -> Self {
        Self::Allocation {
            context: context.into(),
        }
    }

    /// Create a thread-stopped error
    pub fn thread_stopped(thread: impl Into<String>) -> Self {
        Self::ThreadStopped {
            thread: thread.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::Timeout { .. })
    }
}
