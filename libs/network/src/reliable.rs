//! Reliable Transport
//!
//! Same contract as any [`Transport`], but sends go through the
//! [`RetryMonitor`]. Receives pass straight to the raw transport; only the
//! outbound path knows retries exist.

use crate::error::Result;
use crate::retry::RetryMonitor;
use crate::transport::{Transport, TransportStats, TransportType};
use crate::wire::{Frame, WireHeader};
use std::sync::Arc;
use std::time::Duration;

pub struct ReliableTransport {
    raw: Arc<dyn Transport>,
    retry: Arc<RetryMonitor>,
}

impl ReliableTransport {
    pub fn new(raw: Arc<dyn Transport>, retry: Arc<RetryMonitor>) -> Self {
        Self { raw, retry }
    }

    pub fn retry_monitor(&self) -> &Arc<RetryMonitor> {
        &self.retry
    }
}

impl Transport for ReliableTransport {
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        self.retry.send_with_retry(header, payload)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.raw.receive(timeout)
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn transport_type(&self) -> TransportType {
        self.raw.transport_type()
    }

    fn stats(&self) -> TransportStats {
        self.raw.stats()
    }
}
