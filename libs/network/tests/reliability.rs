//! Delivery tracking and bounded retry
//!
//! Drives the monitor and retry layers directly with explicit clock
//! readings, over the in-memory transport.

use network::{
    DeliveryOutcome, DeliveryStatus, MemoryTransport, RetryMonitor, TrackedTransport, Transport,
    TransportMonitor, WireHeader,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn record(signal: &dispatch::Signal<DeliveryStatus>) -> (Arc<Mutex<Vec<DeliveryStatus>>>, dispatch::Connection) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let connection = signal.connect(move |status| sink.lock().push(*status));
    (seen, connection)
}

#[test_log::test]
fn test_ack_round_trip_fires_single_success() {
    let monitor = TransportMonitor::new(Duration::from_millis(50));
    let (seen, _connection) = record(monitor.status());

    monitor.add(7, 42);
    monitor.remove(7);
    monitor.remove(7);

    assert_eq!(
        *seen.lock(),
        vec![DeliveryStatus {
            endpoint: 42,
            seq: 7,
            outcome: DeliveryOutcome::Success,
        }]
    );
    assert_eq!(monitor.pending(), 0);
}

#[test_log::test]
fn test_unknown_ack_fires_nothing() {
    let monitor = TransportMonitor::new(Duration::from_millis(50));
    let (seen, _connection) = record(monitor.status());

    monitor.remove(99);
    assert_eq!(monitor.process_at(Instant::now() + Duration::from_secs(1)), 0);
    assert!(seen.lock().is_empty());
}

#[test_log::test]
fn test_two_retries_then_one_terminal_failure() {
    let (raw, peer) = MemoryTransport::pair();
    let raw = Arc::new(raw);
    let monitor = Arc::new(TransportMonitor::new(Duration::from_millis(50)));
    let tracked = Arc::new(TrackedTransport::new(
        Arc::clone(&raw) as Arc<dyn Transport>,
        Arc::clone(&monitor),
    ));
    let retry = RetryMonitor::new(tracked, &monitor, 2);
    let (terminal, _connection) = record(retry.status());

    retry
        .send_with_retry(&WireHeader::new(42, 500, 4), b"data")
        .unwrap();

    let mut deadlines_restarted = 0;
    for _ in 0..6 {
        if monitor.process_at(Instant::now() + Duration::from_millis(60)) == 1 && monitor.is_pending(500) {
            deadlines_restarted += 1;
        }
    }

    let mut frames = Vec::new();
    while let Some(frame) = peer.receive(Duration::from_millis(5)).unwrap() {
        frames.push(frame);
    }

    // Original plus exactly two resends, all byte-identical.
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f == &frames[0]));
    assert_eq!(deadlines_restarted, 2);
    assert_eq!(
        *terminal.lock(),
        vec![DeliveryStatus {
            endpoint: 42,
            seq: 500,
            outcome: DeliveryOutcome::Timeout,
        }]
    );
    assert_eq!(retry.pending(), 0);
}

#[test_log::test]
fn test_ack_between_retries_stops_resending() {
    let (raw, peer) = MemoryTransport::pair();
    let monitor = Arc::new(TransportMonitor::new(Duration::from_millis(50)));
    let tracked = Arc::new(TrackedTransport::new(Arc::new(raw), Arc::clone(&monitor)));
    let retry = RetryMonitor::new(tracked, &monitor, 5);
    let (outcomes, _connection) = record(retry.status());

    retry
        .send_with_retry(&WireHeader::new(3, 8, 0), &[])
        .unwrap();
    monitor.process_at(Instant::now() + Duration::from_millis(60));
    monitor.remove(8);
    monitor.process_at(Instant::now() + Duration::from_millis(60));

    let mut sent = 0;
    while peer.receive(Duration::from_millis(5)).unwrap().is_some() {
        sent += 1;
    }
    assert_eq!(sent, 2);
    assert_eq!(outcomes.lock().len(), 1);
    assert_eq!(outcomes.lock()[0].outcome, DeliveryOutcome::Success);
}
