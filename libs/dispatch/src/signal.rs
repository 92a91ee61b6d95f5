//! Signals and subscription tokens
//!
//! A [`Signal`] is a multi-subscriber notification channel. Subscribers run
//! synchronously on the emitting thread; wrap the slot in a
//! [`Delegate`](crate::Delegate) to move it to another thread.
//!
//! `connect` hands back a [`Connection`] holding only a weak reference to the
//! signal, so a token that outlives its signal silently becomes inert.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct SignalInner<T> {
    slots: Mutex<Vec<(u64, Slot<T>)>>,
    next_id: AtomicU64,
}

trait Disconnect: Send + Sync {
    fn disconnect(&self, id: u64) -> bool;
    fn contains(&self, id: u64) -> bool;
}

impl<T> Disconnect for SignalInner<T> {
    fn disconnect(&self, id: u64) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    fn contains(&self, id: u64) -> bool {
        self.slots.lock().iter().any(|(slot_id, _)| *slot_id == id)
    }
}

/// Multi-subscriber notification channel
///
/// Cloning a `Signal` yields another handle to the same subscriber list.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe `slot`; it stays connected until the token disconnects it
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.slots.lock().push((id, Arc::new(slot)));

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Connection { id, signal: weak }
    }

    /// Call every connected slot with `value`
    ///
    /// The slot list is snapshotted first, so slots may connect or
    /// disconnect (themselves included) while being called.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in slots {
            slot(value);
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_count() == 0
    }

    pub fn disconnect_all(&self) {
        self.inner.slots.lock().clear();
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.inner.slots.lock().len())
            .finish()
    }
}

/// Subscription token returned by [`Signal::connect`]
///
/// Dropping a plain `Connection` leaves the slot connected; use
/// [`ScopedConnection`] to tie the subscription to a scope.
pub struct Connection {
    id: u64,
    signal: Weak<dyn Disconnect>,
}

impl Connection {
    /// Remove the slot. Returns `false` if it was already gone.
    pub fn disconnect(&self) -> bool {
        match self.signal.upgrade() {
            Some(signal) => signal.disconnect(self.id),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.signal
            .upgrade()
            .map(|signal| signal.contains(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Connection that disconnects when dropped
#[derive(Debug)]
pub struct ScopedConnection(Connection);

impl ScopedConnection {
    pub fn is_connected(&self) -> bool {
        self.0.is_connected()
    }
}

impl From<Connection> for ScopedConnection {
    fn from(connection: Connection) -> Self {
        Self(connection)
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_every_slot() {
        let signal = Signal::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&total);
        let _c1 = signal.connect(move |v| {
            a.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let b = Arc::clone(&total);
        let _c2 = signal.connect(move |v| {
            b.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        signal.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn test_disconnect_and_scoped_drop() {
        let signal = Signal::<()>::new();
        let plain = signal.connect(|_| {});
        {
            let _scoped: ScopedConnection = signal.connect(|_| {}).into();
            assert_eq!(signal.slot_count(), 2);
        }
        assert_eq!(signal.slot_count(), 1);

        assert!(plain.disconnect());
        assert!(!plain.is_connected());
        assert!(signal.is_empty());
    }

    #[test]
    fn test_connection_inert_after_signal_dropped() {
        let signal = Signal::<u8>::new();
        let connection = signal.connect(|_| {});
        assert!(connection.is_connected());

        drop(signal);
        assert!(!connection.is_connected());
        assert!(!connection.disconnect());
    }

    #[test]
    fn test_slot_can_disconnect_itself_during_emit() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot_connection: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        let counter = Arc::clone(&hits);
        let own = Arc::clone(&slot_connection);
        let connection = signal.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(connection) = own.lock().as_ref() {
                connection.disconnect();
            }
        });
        *slot_connection.lock() = Some(connection);

        signal.emit(&());
        signal.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
