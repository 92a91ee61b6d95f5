//! Retry Monitor
//!
//! Keeps a copy of every outbound frame until its fate is known. On a
//! TIMEOUT from the [`TransportMonitor`] the identical frame is resent under
//! the identical sequence number, at most `max_retries` times; the resend
//! goes back through the tracked transport, which restarts the deadline.
//!
//! [`RetryMonitor::status`] republishes SUCCESS and the terminal TIMEOUT
//! only. Intermediate timeouts that led to a resend stay internal.

use crate::error::Result;
use crate::monitor::{DeliveryOutcome, DeliveryStatus, TransportMonitor};
use crate::transport::Transport;
use crate::wire::WireHeader;
use bytes::Bytes;
use dispatch::{Connection, Signal};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

struct RetryEntry {
    header: WireHeader,
    payload: Bytes,
    attempts_remaining: u32,
}

enum TimeoutAction {
    Resend {
        header: WireHeader,
        payload: Bytes,
        attempt: u32,
    },
    Exhausted,
    Untracked,
}

/// Bounded automatic resend on acknowledgment timeout
pub struct RetryMonitor {
    transport: Arc<dyn Transport>,
    max_retries: u32,
    entries: Mutex<HashMap<u16, RetryEntry>>,
    status: Signal<DeliveryStatus>,
    subscription: Connection,
}

impl RetryMonitor {
    /// Retry over `transport`, driven by `monitor`'s notifications
    ///
    /// `transport` must register sends with `monitor` (see
    /// [`TrackedTransport`](crate::transport::TrackedTransport)) or no
    /// timeout will ever be reported.
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: &TransportMonitor,
        max_retries: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<RetryMonitor>| {
            let weak = weak.clone();
            let subscription = monitor.status().connect(move |status| {
                if let Some(retry) = weak.upgrade() {
                    retry.on_status(status);
                }
            });
            Self {
                transport,
                max_retries,
                entries: Mutex::new(HashMap::new()),
                status: Signal::new(),
                subscription,
            }
        })
    }

    /// SUCCESS and terminal TIMEOUT notifications
    pub fn status(&self) -> &Signal<DeliveryStatus> {
        &self.status
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Store a copy of the frame, then send it
    ///
    /// Acknowledgments bypass retry. If the first send fails the entry is
    /// discarded and the error returned to the caller.
    pub fn send_with_retry(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        if header.is_ack() {
            return self.transport.send(header, payload);
        }

        self.entries.lock().insert(
            header.seq,
            RetryEntry {
                header: *header,
                payload: Bytes::copy_from_slice(payload),
                attempts_remaining: self.max_retries,
            },
        );

        let sent = self.transport.send(header, payload);
        if sent.is_err() {
            self.entries.lock().remove(&header.seq);
        }
        sent
    }

    /// Sequence numbers awaiting an outcome
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn attempts_remaining(&self, seq: u16) -> Option<u32> {
        self.entries.lock().get(&seq).map(|e| e.attempts_remaining)
    }

    fn on_status(&self, status: &DeliveryStatus) {
        match status.outcome {
            DeliveryOutcome::Success => {
                self.entries.lock().remove(&status.seq);
                self.status.emit(status);
            }
            DeliveryOutcome::Timeout => self.on_timeout(status),
        }
    }

    fn on_timeout(&self, status: &DeliveryStatus) {
        let action = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&status.seq) {
                Some(entry) if entry.attempts_remaining > 0 => {
                    entry.attempts_remaining -= 1;
                    TimeoutAction::Resend {
                        header: entry.header,
                        payload: entry.payload.clone(),
                        attempt: self.max_retries - entry.attempts_remaining,
                    }
                }
                Some(_) => {
                    entries.remove(&status.seq);
                    TimeoutAction::Exhausted
                }
                None => TimeoutAction::Untracked,
            }
        };

        match action {
            TimeoutAction::Resend {
                header,
                payload,
                attempt,
            } => {
                warn!(
                    seq = header.seq,
                    endpoint = header.id,
                    attempt,
                    max_retries = self.max_retries,
                    "Resending unacknowledged frame"
                );
                if let Err(e) = self.transport.send(&header, &payload) {
                    error!(seq = header.seq, error = %e, "Resend failed, giving up");
                    self.entries.lock().remove(&header.seq);
                    self.status.emit(status);
                }
            }
            TimeoutAction::Exhausted => {
                error!(
                    seq = status.seq,
                    endpoint = status.endpoint,
                    attempts = self.max_retries + 1,
                    "Delivery failed, retries exhausted"
                );
                self.status.emit(status);
            }
            TimeoutAction::Untracked => {
                debug!(seq = status.seq, "Timeout for frame sent without retry");
                self.status.emit(status);
            }
        }
    }
}

impl Drop for RetryMonitor {
    fn drop(&mut self) {
        self.subscription.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TrackedTransport};
    use std::time::{Duration, Instant};

    struct Harness {
        monitor: Arc<TransportMonitor>,
        retry: Arc<RetryMonitor>,
        peer: MemoryTransport,
        raw: Arc<MemoryTransport>,
        seen: Arc<Mutex<Vec<DeliveryStatus>>>,
        _connection: Connection,
    }

    fn harness(max_retries: u32) -> Harness {
        let (a, peer) = MemoryTransport::pair();
        let raw = Arc::new(a);
        let monitor = Arc::new(TransportMonitor::new(Duration::from_millis(50)));
        let tracked: Arc<dyn Transport> = Arc::new(TrackedTransport::new(
            Arc::clone(&raw) as Arc<dyn Transport>,
            Arc::clone(&monitor),
        ));
        let retry = RetryMonitor::new(tracked, &monitor, max_retries);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connection = retry.status().connect(move |s| sink.lock().push(*s));
        Harness {
            monitor,
            retry,
            peer,
            raw,
            seen,
            _connection: connection,
        }
    }

    fn drain(peer: &MemoryTransport) -> Vec<u16> {
        let mut seqs = Vec::new();
        while let Some(frame) = peer.receive(Duration::from_millis(5)).unwrap() {
            seqs.push(frame.header.seq);
        }
        seqs
    }

    #[test]
    fn test_success_discards_entry() {
        let h = harness(2);
        h.retry
            .send_with_retry(&WireHeader::new(8, 30, 1), b"x")
            .unwrap();
        assert_eq!(h.retry.pending(), 1);

        h.monitor.remove(30);
        assert_eq!(h.retry.pending(), 0);
        assert_eq!(h.seen.lock()[0].outcome, DeliveryOutcome::Success);
    }

    #[test]
    fn test_resend_reuses_sequence_and_bytes() {
        let h = harness(1);
        h.retry
            .send_with_retry(&WireHeader::new(8, 31, 3), b"abc")
            .unwrap();
        let original = h.peer.receive(Duration::from_millis(50)).unwrap().unwrap();

        h.monitor.process_at(Instant::now() + Duration::from_millis(60));
        let resent = h.peer.receive(Duration::from_millis(50)).unwrap().unwrap();

        assert_eq!(original, resent);
        assert_eq!(h.retry.attempts_remaining(31), Some(0));
        assert!(h.monitor.is_pending(31));
        assert!(h.seen.lock().is_empty());
    }

    #[test]
    fn test_bounded_retry_then_terminal_failure() {
        let h = harness(2);
        h.retry
            .send_with_retry(&WireHeader::new(8, 32, 0), &[])
            .unwrap();

        for _ in 0..5 {
            h.monitor
                .process_at(Instant::now() + Duration::from_millis(60));
        }

        assert_eq!(drain(&h.peer), vec![32, 32, 32]);
        assert_eq!(h.raw.stats().frames_sent, 3);
        assert_eq!(
            *h.seen.lock(),
            vec![DeliveryStatus {
                endpoint: 8,
                seq: 32,
                outcome: DeliveryOutcome::Timeout
            }]
        );
        assert_eq!(h.retry.pending(), 0);
        assert_eq!(h.monitor.pending(), 0);
    }

    #[test]
    fn test_failed_first_send_leaves_no_entry() {
        let h = harness(2);
        drop(h.peer);
        assert!(h
            .retry
            .send_with_retry(&WireHeader::new(8, 33, 0), &[])
            .is_err());
        assert_eq!(h.retry.pending(), 0);
        assert_eq!(h.monitor.pending(), 0);
    }
}
