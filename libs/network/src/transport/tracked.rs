//! Monitored Transport
//!
//! Decorator that registers every non-acknowledgment send with the
//! [`TransportMonitor`] before handing it to the wrapped transport.

use super::{Transport, TransportStats, TransportType};
use crate::error::Result;
use crate::monitor::TransportMonitor;
use crate::wire::{Frame, WireHeader};
use std::sync::Arc;
use std::time::Duration;

pub struct TrackedTransport {
    inner: Arc<dyn Transport>,
    monitor: Arc<TransportMonitor>,
}

impl TrackedTransport {
    pub fn new(inner: Arc<dyn Transport>, monitor: Arc<TransportMonitor>) -> Self {
        Self { inner, monitor }
    }

    pub fn monitor(&self) -> &Arc<TransportMonitor> {
        &self.monitor
    }
}

impl Transport for TrackedTransport {
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        // Tracked first: on a fast link the ack can beat the return of send.
        if !header.is_ack() {
            self.monitor.add(header.seq, header.id);
        }
        let sent = self.inner.send(header, payload);
        if sent.is_err() && !header.is_ack() {
            self.monitor.cancel(header.seq);
        }
        sent
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.inner.receive(timeout)
    }

    fn is_reliable(&self) -> bool {
        self.inner.is_reliable()
    }

    fn transport_type(&self) -> TransportType {
        self.inner.transport_type()
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}
