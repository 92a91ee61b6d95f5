//! Cross-thread delegates
//!
//! A delegate binds a callable target to a destination thread. Invoking it
//! builds an [`InvocationMessage`]: a clone of the target plus a heap-owned
//! copy of the arguments, so the caller's frame may unwind before the
//! destination thread runs the call.
//!
//! Argument types must be `Send + 'static`. That rules out borrowed
//! references of any kind (including `&mut Arc<T>`) at compile time; owned
//! values and owned handles such as `Arc<T>` are accepted.

use crate::error::{DispatchError, Result};
use crate::task::{Priority, Task};
use crate::thread::{call_and_wait, ThreadAdapter};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default time a [`WaitDelegate`] blocks for its result
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

type Target<A> = Arc<dyn Fn(A) + Send + Sync + 'static>;
type ReturningTarget<A, R> = Arc<dyn Fn(A) -> R + Send + Sync + 'static>;

/// Self-contained cross-thread call: cloned target plus owned arguments
pub struct InvocationMessage<A> {
    target: Target<A>,
    args: Box<A>,
}

impl<A: Send + 'static> InvocationMessage<A> {
    pub fn new(target: Target<A>, args: A) -> Self {
        Self {
            target,
            args: Box::new(args),
        }
    }

    /// Call the target with the owned arguments; consumes the message
    pub fn dispatch(self) {
        (self.target)(*self.args)
    }

    /// Wrap the message in a task for the destination queue
    pub fn into_task(self, priority: Priority) -> Task {
        Task::new(priority, move || self.dispatch())
    }
}

fn same_target<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn same_thread(a: &Option<Arc<dyn ThreadAdapter>>, b: &Option<Arc<dyn ThreadAdapter>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.key() == b.key(),
        (None, None) => true,
        _ => false,
    }
}

/// Fire-and-forget call of `Fn(A)` on a destination thread
pub struct Delegate<A> {
    target: Option<Target<A>>,
    thread: Option<Arc<dyn ThreadAdapter>>,
    priority: Priority,
}

impl<A: Send + 'static> Delegate<A> {
    pub fn new<F>(thread: Arc<dyn ThreadAdapter>, target: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            target: Some(Arc::new(target)),
            thread: Some(thread),
            priority: Priority::Normal,
        }
    }

    /// Delegate with no target; invoking it fails with `EmptyTarget`
    pub fn empty() -> Self {
        Self {
            target: None,
            thread: None,
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() || self.thread.is_none()
    }

    /// Queue a call with `args` on the destination thread
    pub fn invoke(&self, args: A) -> Result<()> {
        let (target, thread) = match (&self.target, &self.thread) {
            (Some(target), Some(thread)) => (target, thread),
            _ => return Err(DispatchError::EmptyTarget),
        };
        let message = InvocationMessage::new(Arc::clone(target), args);
        thread.enqueue(message.into_task(self.priority))
    }

    pub fn clear(&mut self) {
        self.target = None;
        self.thread = None;
    }
}

impl<A> Clone for Delegate<A> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            thread: self.thread.clone(),
            priority: self.priority,
        }
    }
}

impl<A> PartialEq for Delegate<A> {
    fn eq(&self, other: &Self) -> bool {
        let targets = match (&self.target, &other.target) {
            (Some(a), Some(b)) => same_target(a, b),
            (None, None) => true,
            _ => false,
        };
        targets && same_thread(&self.thread, &other.thread)
    }
}

impl<A: Send + 'static> Default for Delegate<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A> fmt::Debug for Delegate<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("thread", &self.thread.as_ref().map(|t| t.name().to_string()))
            .field("bound", &self.target.is_some())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Blocking call of `Fn(A) -> R` on a destination thread
pub struct WaitDelegate<A, R> {
    target: Option<ReturningTarget<A, R>>,
    thread: Option<Arc<dyn ThreadAdapter>>,
    priority: Priority,
    timeout: Duration,
}

impl<A: Send + 'static, R: Send + 'static> WaitDelegate<A, R> {
    pub fn new<F>(thread: Arc<dyn ThreadAdapter>, target: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            target: Some(Arc::new(target)),
            thread: Some(thread),
            priority: Priority::Normal,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn empty() -> Self {
        Self {
            target: None,
            thread: None,
            priority: Priority::Normal,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() || self.thread.is_none()
    }

    /// Call the target on its thread and block for the return value
    pub fn invoke(&self, args: A) -> Result<R> {
        let (target, thread) = match (&self.target, &self.thread) {
            (Some(target), Some(thread)) => (Arc::clone(target), thread),
            _ => return Err(DispatchError::EmptyTarget),
        };
        let args = Box::new(args);
        call_and_wait(&**thread, self.priority, self.timeout, move || target(*args))
    }
}

impl<A, R> Clone for WaitDelegate<A, R> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            thread: self.thread.clone(),
            priority: self.priority,
            timeout: self.timeout,
        }
    }
}

impl<A, R> PartialEq for WaitDelegate<A, R> {
    fn eq(&self, other: &Self) -> bool {
        let targets = match (&self.target, &other.target) {
            (Some(a), Some(b)) => same_target(a, b),
            (None, None) => true,
            _ => false,
        };
        targets && same_thread(&self.thread, &other.thread)
    }
}

impl<A, R> fmt::Debug for WaitDelegate<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitDelegate")
            .field("thread", &self.thread.as_ref().map(|t| t.name().to_string()))
            .field("bound", &self.target.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
