//! Transport Monitor
//!
//! Tracks every in-flight outbound frame by sequence number. An
//! acknowledgment ends the record with SUCCESS; a scan that finds the record
//! older than the deadline ends it with TIMEOUT. Both outcomes are published
//! on [`TransportMonitor::status`].
//!
//! The monitor is not self-driving: the owner calls [`TransportMonitor::process`]
//! periodically. Records are removed and the lock released before any
//! notification fires, so a handler may call straight back into `add`.

use crate::wire::ACK_ID;
use dispatch::Signal;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Final state of one tracked send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    Timeout,
}

/// Notification for one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub endpoint: u16,
    pub seq: u16,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Copy)]
struct PendingSend {
    endpoint: u16,
    sent_at: Instant,
}

/// In-flight send bookkeeping
pub struct TransportMonitor {
    timeout: Duration,
    pending: Mutex<HashMap<u16, PendingSend>>,
    status: Signal<DeliveryStatus>,
}

impl TransportMonitor {
    /// Monitor with an acknowledgment deadline of `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Mutex::new(HashMap::new()),
            status: Signal::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// SUCCESS and TIMEOUT notifications
    pub fn status(&self) -> &Signal<DeliveryStatus> {
        &self.status
    }

    /// Start tracking `seq`, sent now to `endpoint`
    pub fn add(&self, seq: u16, endpoint: u16) {
        self.add_at(seq, endpoint, Instant::now());
    }

    /// Start tracking `seq` with an explicit send timestamp
    ///
    /// Acknowledgment frames are never tracked. Re-adding a live sequence
    /// number restarts its deadline.
    pub fn add_at(&self, seq: u16, endpoint: u16, sent_at: Instant) {
        if endpoint == ACK_ID {
            return;
        }
        let replaced = self
            .pending
            .lock()
            .insert(seq, PendingSend { endpoint, sent_at });
        if replaced.is_some() {
            trace!(seq, endpoint, "Deadline restarted");
        }
    }

    /// Acknowledgment received for `seq`
    ///
    /// Fires SUCCESS and returns `true` if `seq` was in flight; an unknown
    /// or late acknowledgment is a no-op.
    pub fn remove(&self, seq: u16) -> bool {
        let record = self.pending.lock().remove(&seq);
        match record {
            Some(record) => {
                debug!(seq, endpoint = record.endpoint, "Delivery acknowledged");
                self.status.emit(&DeliveryStatus {
                    endpoint: record.endpoint,
                    seq,
                    outcome: DeliveryOutcome::Success,
                });
                true
            }
            None => {
                trace!(seq, "Ignoring acknowledgment for unknown sequence");
                false
            }
        }
    }

    /// Stop tracking `seq` without a notification
    ///
    /// Used when the send itself failed, so no acknowledgment can arrive.
    pub fn cancel(&self, seq: u16) -> bool {
        self.pending.lock().remove(&seq).is_some()
    }

    /// Expire overdue records; returns how many timed out
    pub fn process(&self) -> usize {
        self.process_at(Instant::now())
    }

    /// Expire records older than the deadline as of `now`
    pub fn process_at(&self, now: Instant) -> usize {
        let expired: Vec<(u16, PendingSend)> = {
            let mut pending = self.pending.lock();
            let seqs: Vec<u16> = pending
                .iter()
                .filter(|(_, record)| now.saturating_duration_since(record.sent_at) > self.timeout)
                .map(|(seq, _)| *seq)
                .collect();
            seqs.into_iter()
                .filter_map(|seq| pending.remove(&seq).map(|record| (seq, record)))
                .collect()
        };

        for (seq, record) in &expired {
            debug!(seq, endpoint = record.endpoint, "Delivery deadline elapsed");
            self.status.emit(&DeliveryStatus {
                endpoint: record.endpoint,
                seq: *seq,
                outcome: DeliveryOutcome::Timeout,
            });
        }
        expired.len()
    }

    /// Number of sends awaiting acknowledgment
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, seq: u16) -> bool {
        self.pending.lock().contains_key(&seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder(monitor: &TransportMonitor) -> (Arc<Mutex<Vec<DeliveryStatus>>>, dispatch::Connection) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connection = monitor.status().connect(move |status| sink.lock().push(*status));
        (seen, connection)
    }

    #[test]
    fn test_ack_round_trip() {
        let monitor = TransportMonitor::new(Duration::from_millis(50));
        let (seen, _connection) = recorder(&monitor);

        monitor.add(7, 42);
        assert!(monitor.remove(7));

        assert_eq!(
            *seen.lock(),
            vec![DeliveryStatus {
                endpoint: 42,
                seq: 7,
                outcome: DeliveryOutcome::Success
            }]
        );
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn test_unknown_ack_is_noop() {
        let monitor = TransportMonitor::new(Duration::from_millis(50));
        let (seen, _connection) = recorder(&monitor);

        assert!(!monitor.remove(99));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_process_expires_only_overdue() {
        let monitor = TransportMonitor::new(Duration::from_millis(50));
        let (seen, _connection) = recorder(&monitor);
        let base = Instant::now();

        monitor.add_at(1, 10, base);
        monitor.add_at(2, 20, base + Duration::from_millis(40));

        assert_eq!(monitor.process_at(base + Duration::from_millis(60)), 1);
        assert_eq!(seen.lock()[0].seq, 1);
        assert_eq!(seen.lock()[0].outcome, DeliveryOutcome::Timeout);
        assert!(monitor.is_pending(2));

        // A late ack for the expired record is ignored.
        assert!(!monitor.remove(1));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_ack_frames_are_not_tracked() {
        let monitor = TransportMonitor::new(Duration::from_millis(50));
        monitor.add(5, ACK_ID);
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn test_cancel_is_silent() {
        let monitor = TransportMonitor::new(Duration::from_millis(50));
        let (seen, _connection) = recorder(&monitor);
        monitor.add(3, 8);
        assert!(monitor.cancel(3));
        assert!(seen.lock().is_empty());
        assert_eq!(monitor.pending(), 0);
    }

    #[test]
    fn test_handler_may_re_add_during_timeout() {
        let monitor = Arc::new(TransportMonitor::new(Duration::from_millis(10)));
        let weak = Arc::downgrade(&monitor);
        let _connection = monitor.status().connect(move |status| {
            if let Some(monitor) = weak.upgrade() {
                monitor.add(status.seq, status.endpoint);
            }
        });

        monitor.add_at(4, 1, Instant::now() - Duration::from_millis(20));
        assert_eq!(monitor.process(), 1);
        assert!(monitor.is_pending(4));
    }
}
