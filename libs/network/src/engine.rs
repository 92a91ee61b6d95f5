//! Network Engine
//!
//! Owns the outbound stack (dispatcher, monitor, optional retry) and the
//! inbound path for one transport:
//!
//! ```text
//! send ──> Dispatcher ──> ReliableTransport ──> RetryMonitor ──> TrackedTransport ──> raw
//!                                                                                     │
//! receive thread <──────────────────────────────────────────────────────────────────┘
//!     └─> engine thread queue ──> ack reply, duplicate filter, registry lookup, invoke
//! ```
//!
//! The receive thread only blocks on the raw transport; every frame is
//! handed to the engine's [`WorkerThread`], so invokers, the registry and
//! the timeout scan all run on that one thread. Transports that report
//! `is_reliable()` skip the retry layer.

use crate::config::EngineConfig;
use crate::dedupe::DuplicateFilter;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, ErrorKind, NetworkError, Result};
use crate::monitor::{DeliveryOutcome, DeliveryStatus, TransportMonitor};
use crate::registry::{EndpointRegistry, Invoker, RemoteEndpoint};
use crate::reliable::ReliableTransport;
use crate::remote::RemoteDelegate;
use crate::retry::RetryMonitor;
use crate::transport::{TrackedTransport, Transport, TransportStats};
use crate::wire::{Frame, WireHeader, ACK_ID};
use dispatch::{Connection, Priority, ShutdownMode, Signal, TimerHandle, WorkerThread};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Callers blocked in `send_and_wait`, keyed by sequence number
#[derive(Default)]
struct Waiters {
    slots: Mutex<HashMap<u16, Option<DeliveryOutcome>>>,
    ready: Condvar,
}

impl Waiters {
    fn register(&self, seq: u16) {
        self.slots.lock().insert(seq, None);
    }

    fn cancel(&self, seq: u16) {
        self.slots.lock().remove(&seq);
    }

    fn complete(&self, status: &DeliveryStatus) {
        let found = match self.slots.lock().get_mut(&status.seq) {
            Some(slot) => {
                *slot = Some(status.outcome);
                true
            }
            None => false,
        };
        if found {
            self.ready.notify_all();
        }
    }

    fn wait(&self, seq: u16, deadline: Instant) -> Option<DeliveryOutcome> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(Some(outcome)) = slots.get(&seq).copied() {
                slots.remove(&seq);
                return Some(outcome);
            }
            if self.ready.wait_until(&mut slots, deadline).timed_out() {
                return slots.remove(&seq).flatten();
            }
        }
    }
}

struct Links {
    raw: Arc<dyn Transport>,
    retry: Option<Arc<RetryMonitor>>,
    subscription: Connection,
}

struct EngineInner {
    config: EngineConfig,
    thread: WorkerThread,
    monitor: Arc<TransportMonitor>,
    dispatcher: Dispatcher,
    links: RwLock<Option<Links>>,
    registry: Mutex<EndpointRegistry>,
    dedupe: Mutex<DuplicateFilter>,
    delivery: Signal<DeliveryStatus>,
    errors: Signal<EngineError>,
    waiters: Arc<Waiters>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    process_timer: Mutex<Option<TimerHandle>>,
}

/// Handle to a network engine
///
/// Cloning is cheap; all clones drive the same engine. The engine thread
/// and receive loop stop when the last handle is dropped or on
/// [`NetworkEngine::shutdown`].
#[derive(Clone)]
pub struct NetworkEngine {
    inner: Arc<EngineInner>,
}

impl NetworkEngine {
    /// Spawn the engine thread; no traffic flows until `initialize` and `start`
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let thread = WorkerThread::spawn(config.thread_name.clone(), config.queue.clone())?;

        let inner = EngineInner {
            monitor: Arc::new(TransportMonitor::new(config.ack_timeout())),
            dispatcher: Dispatcher::new(),
            links: RwLock::new(None),
            registry: Mutex::new(EndpointRegistry::new()),
            dedupe: Mutex::new(DuplicateFilter::new(config.dedupe_window)),
            delivery: Signal::new(),
            errors: Signal::new(),
            waiters: Arc::new(Waiters::default()),
            running: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
            process_timer: Mutex::new(None),
            thread,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Attach `transport`, building the tracking and retry layers over it
    ///
    /// Replaces a previously attached transport. Not allowed while running.
    pub fn initialize(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let inner = &self.inner;
        if self.is_running() {
            return Err(NetworkError::configuration(
                "cannot initialize a running engine; call stop first",
                Some("transport"),
            ));
        }

        let tracked: Arc<dyn Transport> = Arc::new(TrackedTransport::new(
            Arc::clone(&transport),
            Arc::clone(&inner.monitor),
        ));
        let retries = inner.config.max_retries;
        let (outbound, retry) = if transport.is_reliable() || retries == 0 {
            (tracked, None)
        } else {
            let retry = RetryMonitor::new(tracked, &inner.monitor, retries);
            let reliable: Arc<dyn Transport> = Arc::new(ReliableTransport::new(
                Arc::clone(&transport),
                Arc::clone(&retry),
            ));
            (reliable, Some(retry))
        };

        let delivery = inner.delivery.clone();
        let waiters = Arc::clone(&inner.waiters);
        let forward = move |status: &DeliveryStatus| {
            waiters.complete(status);
            delivery.emit(status);
        };
        let subscription = match &retry {
            Some(retry) => retry.status().connect(forward),
            None => inner.monitor.status().connect(forward),
        };

        info!(
            transport = %transport.transport_type(),
            retry = retry.is_some(),
            max_retries = retries,
            ack_timeout_ms = inner.config.ack_timeout_ms,
            "Network engine initialized"
        );

        inner.dispatcher.set_transport(outbound);
        let previous = inner.links.write().replace(Links {
            raw: transport,
            retry,
            subscription,
        });
        if let Some(previous) = previous {
            previous.subscription.disconnect();
        }
        Ok(())
    }

    /// Start the receive loop and the periodic timeout scan
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let raw = inner
            .links
            .read()
            .as_ref()
            .map(|links| Arc::clone(&links.raw))
            .ok_or_else(|| {
                NetworkError::configuration("start called before initialize", Some("transport"))
            })?;

        if inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let monitor = Arc::clone(&inner.monitor);
        let timer = inner.thread.add_timer(inner.config.process_interval(), move || {
            monitor.process();
        });
        *inner.process_timer.lock() = Some(timer);

        let weak = Arc::downgrade(inner);
        let running = Arc::clone(&inner.running);
        let poll = inner.config.receive_poll();
        let name = format!("{}-rx", inner.config.thread_name);
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || receive_loop(weak, raw, running, poll));

        match spawned {
            Ok(handle) => {
                *inner.receiver.lock() = Some(handle);
                info!(thread = %name, "Network engine started");
                Ok(())
            }
            Err(e) => {
                inner.running.store(false, Ordering::SeqCst);
                inner.process_timer.lock().take();
                Err(NetworkError::io(format!("Failed to spawn {name}"), e))
            }
        }
    }

    /// Stop the receive loop and the timeout scan; the engine thread stays up
    pub fn stop(&self) {
        if self.inner.stop_receiving() {
            info!(thread = %self.inner.config.thread_name, "Network engine stopped");
        }
    }

    /// Stop, then drain and join the engine thread
    pub fn shutdown(&self) -> Result<()> {
        self.stop();
        self.inner.thread.shutdown(ShutdownMode::Drain)?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register `invoker` for endpoint `id` on the engine thread
    pub fn register_endpoint(&self, id: u16, invoker: Arc<dyn Invoker>) -> Result<()> {
        if id == ACK_ID {
            return Err(NetworkError::configuration(
                format!("endpoint id {ACK_ID} is reserved for acknowledgments"),
                Some("id"),
            ));
        }

        let inner = Arc::clone(&self.inner);
        let replaced = self.inner.thread.invoke_wait(
            Priority::High,
            self.inner.config.wait_timeout(),
            move || {
                let previous = inner.registry.lock().insert(id, invoker);
                previous.is_some()
            },
        )?;
        if replaced {
            warn!(id, "Endpoint re-registered, previous invoker replaced");
        } else {
            debug!(id, "Endpoint registered");
        }
        Ok(())
    }

    /// Register a bincode-decoded target for endpoint `id`
    pub fn register<A, F>(&self, id: u16, target: F) -> Result<()>
    where
        A: DeserializeOwned + serde::Serialize + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        self.register_endpoint(id, Arc::new(RemoteEndpoint::new(target)))
    }

    /// Remote delegate sending bincode-encoded `A` to endpoint `id`
    pub fn remote<A>(&self, id: u16) -> RemoteDelegate<A>
    where
        A: serde::Serialize + DeserializeOwned,
    {
        RemoteDelegate::new(self.clone(), id)
    }

    /// Send `payload` to endpoint `id`; returns the sequence number
    ///
    /// A failure is returned and also published on [`NetworkEngine::errors`].
    pub fn send(&self, id: u16, payload: &[u8]) -> Result<u16> {
        let sent = self.inner.dispatcher.dispatch(payload, id);
        self.reported(id, sent)
    }

    /// Send and block until the frame is acknowledged or has failed
    ///
    /// Waits on the frame's own sequence number, across retries, for at
    /// most `wait_timeout`. Refused on the engine thread, which is the
    /// thread that would process the acknowledgment.
    pub fn send_and_wait(&self, id: u16, payload: &[u8]) -> Result<u16> {
        let inner = &self.inner;
        if inner.thread.is_current() {
            return self.reported(
                id,
                Err(NetworkError::configuration(
                    "send_and_wait would block the engine thread",
                    Some("thread"),
                )),
            );
        }

        let seq = inner.dispatcher.next_sequence();
        inner.waiters.register(seq);
        if let Err(e) = inner.dispatcher.dispatch_with_seq(payload, id, seq) {
            inner.waiters.cancel(seq);
            return self.reported(id, Err(e));
        }

        // Delivery failures go out on the delivery-status signal instead.
        let timeout = inner.config.wait_timeout();
        match inner.waiters.wait(seq, Instant::now() + timeout) {
            Some(DeliveryOutcome::Success) => Ok(seq),
            Some(DeliveryOutcome::Timeout) => Err(NetworkError::Delivery {
                endpoint: id,
                seq,
                attempts: self.attempts_per_send(),
            }),
            None => Err(NetworkError::timeout(
                format!("send_and_wait to endpoint {id}"),
                timeout.as_millis() as u64,
            )),
        }
    }

    /// Transmissions a frame gets before it counts as undelivered
    ///
    /// `max_retries + 1` with the retry layer in place, otherwise 1.
    pub fn attempts_per_send(&self) -> u32 {
        self.inner
            .links
            .read()
            .as_ref()
            .and_then(|links| links.retry.as_ref().map(|retry| retry.max_retries() + 1))
            .unwrap_or(1)
    }

    /// Publish an outbound failure on the error signal, passing it through
    pub(crate) fn reported<T>(&self, id: u16, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            debug!(id, error = %e, "Outbound call failed");
            self.inner.report(EngineError::from_error(id, e));
        }
        result
    }

    /// (endpoint, seq, SUCCESS | TIMEOUT) notifications
    ///
    /// Fires on the engine thread. With retry enabled only final outcomes
    /// are published.
    pub fn delivery_status(&self) -> &Signal<DeliveryStatus> {
        &self.inner.delivery
    }

    /// Receive-path and outbound-call failures
    ///
    /// Fires on the thread that hit the failure: the caller for outbound
    /// calls, the receive or engine thread otherwise.
    pub fn errors(&self) -> &Signal<EngineError> {
        &self.inner.errors
    }

    /// Raw transport counters, once initialized
    pub fn stats(&self) -> Option<TransportStats> {
        self.inner
            .links
            .read()
            .as_ref()
            .map(|links| links.raw.stats())
    }

    /// Frames awaiting acknowledgment
    pub fn in_flight(&self) -> usize {
        self.inner.monitor.pending()
    }

    /// Frames held for possible resend
    pub fn retry_pending(&self) -> usize {
        self.inner
            .links
            .read()
            .as_ref()
            .and_then(|links| links.retry.as_ref().map(|retry| retry.pending()))
            .unwrap_or(0)
    }

    pub fn monitor(&self) -> &Arc<TransportMonitor> {
        &self.inner.monitor
    }

    /// The engine's own worker thread
    pub fn thread(&self) -> &WorkerThread {
        &self.inner.thread
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether both handles drive the same engine
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl EngineInner {
    fn stop_receiving(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
        self.process_timer.lock().take();
        was_running
    }

    fn report(&self, error: EngineError) {
        self.errors.emit(&error);
    }

    fn raw(&self) -> Option<Arc<dyn Transport>> {
        self.links.read().as_ref().map(|links| Arc::clone(&links.raw))
    }

    /// Runs on the engine thread
    fn handle_frame(&self, frame: Frame) {
        let header = frame.header;
        if header.is_ack() {
            trace!(seq = header.seq, "Acknowledgment received");
            self.monitor.remove(header.seq);
            return;
        }

        if self.config.send_acks {
            self.send_ack(&header);
        }

        if !self.dedupe.lock().check(header.id, header.seq) {
            debug!(id = header.id, seq = header.seq, "Suppressing duplicate frame");
            return;
        }

        let invoker = self.registry.lock().get(header.id);
        match invoker {
            Some(invoker) => {
                if let Err(e) = invoker.invoke(&frame.payload) {
                    let e = e.for_endpoint(header.id);
                    warn!(id = header.id, seq = header.seq, error = %e, "Endpoint invocation failed");
                    self.report(EngineError::from_error(header.id, &e));
                }
            }
            None => {
                warn!(id = header.id, seq = header.seq, "No endpoint registered for frame");
                self.report(EngineError::new(
                    header.id,
                    ErrorKind::UnknownEndpoint,
                    format!("no endpoint registered for id {}", header.id),
                ));
            }
        }
    }

    fn send_ack(&self, header: &WireHeader) {
        let Some(raw) = self.raw() else {
            return;
        };
        if let Err(e) = raw.send(&WireHeader::ack(header.seq), &[]) {
            warn!(seq = header.seq, error = %e, "Failed to send acknowledgment");
            self.report(EngineError::from_error(header.id, &e));
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.stop_receiving();
        if let Some(links) = self.links.get_mut().take() {
            links.subscription.disconnect();
        }
        if let Err(e) = self.thread.shutdown(ShutdownMode::Drain) {
            warn!(error = %e, "Engine thread did not shut down cleanly");
        }
    }
}

fn receive_loop(
    engine: Weak<EngineInner>,
    raw: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("Receive loop running");
    while running.load(Ordering::Acquire) {
        match raw.receive(poll) {
            Ok(Some(frame)) => {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let (id, seq) = (frame.header.id, frame.header.seq);
                let target = Arc::clone(&inner);
                let posted = inner
                    .thread
                    .post(Priority::Normal, move || target.handle_frame(frame));
                if let Err(e) = posted {
                    warn!(id, seq, error = %e, "Dropping inbound frame");
                    inner.report(EngineError::from_error(id, &NetworkError::from(e)));
                }
            }
            Ok(None) => {}
            Err(NetworkError::Protocol(e)) => {
                debug!(error = %e, "Discarded malformed frame");
                if let Some(inner) = engine.upgrade() {
                    inner.report(EngineError::new(0, ErrorKind::Protocol, e.to_string()));
                }
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                if let Some(inner) = engine.upgrade() {
                    inner.report(EngineError::from_error(0, &e));
                }
                std::thread::sleep(poll);
            }
        }
    }
    debug!("Receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn test_start_requires_transport() {
        let engine = NetworkEngine::new(EngineConfig::default().with_thread_name("no-transport")).unwrap();
        assert!(matches!(engine.start(), Err(NetworkError::Configuration { .. })));
        assert!(matches!(engine.send(1, b"x"), Err(NetworkError::Configuration { .. })));
    }

    #[test]
    fn test_reserved_endpoint_cannot_be_registered() {
        let engine = NetworkEngine::new(EngineConfig::default().with_thread_name("reserved")).unwrap();
        assert!(engine.register(ACK_ID, |_: u8| {}).is_err());
        assert!(engine.register(1, |_: u8| {}).is_ok());
    }

    #[test]
    fn test_send_and_wait_refused_on_engine_thread() {
        let engine = NetworkEngine::new(EngineConfig::default().with_thread_name("self-wait")).unwrap();
        let (a, _b) = MemoryTransport::pair();
        engine.initialize(Arc::new(a)).unwrap();

        let inside = engine.clone();
        let result = engine
            .thread()
            .invoke_wait(Priority::Normal, Duration::from_secs(1), move || {
                matches!(
                    inside.send_and_wait(1, b"x"),
                    Err(NetworkError::Configuration { .. })
                )
            })
            .unwrap();
        assert!(result);
    }

    #[test]
    fn test_reliable_transport_skips_retry_layer() {
        let engine = NetworkEngine::new(EngineConfig::default().with_thread_name("native")).unwrap();
        let (a, _b) = MemoryTransport::pair_with(true);
        engine.initialize(Arc::new(a)).unwrap();
        engine.send(3, b"x").unwrap();
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(engine.retry_pending(), 0);
        assert_eq!(engine.attempts_per_send(), 1);
    }

    #[test]
    fn test_retry_layer_counts_every_attempt() {
        let engine = NetworkEngine::new(EngineConfig::default().with_thread_name("lossy")).unwrap();
        assert_eq!(engine.attempts_per_send(), 1);
        let (a, _b) = MemoryTransport::pair();
        engine.initialize(Arc::new(a)).unwrap();
        assert_eq!(engine.attempts_per_send(), 4);
    }

    #[test]
    fn test_waiter_wakes_on_completion() {
        let waiters = Arc::new(Waiters::default());
        waiters.register(9);
        let completer = Arc::clone(&waiters);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(&DeliveryStatus {
                endpoint: 1,
                seq: 9,
                outcome: DeliveryOutcome::Success,
            });
        });
        let outcome = waiters.wait(9, Instant::now() + Duration::from_secs(1));
        handle.join().unwrap();
        assert_eq!(outcome, Some(DeliveryOutcome::Success));
        assert!(waiters.wait(9, Instant::now() + Duration::from_millis(10)).is_none());
    }
}
