//! In-Process Transport
//!
//! A connected pair of endpoints over `crossbeam-channel`. Frames are
//! encoded to bytes exactly as a socket backend would, so decoding and
//! marker validation are exercised end to end. Loss injection makes retry
//! behavior deterministic in tests.

use super::{MetricsTracker, Transport, TransportStats, TransportType};
use crate::error::{NetworkError, Result};
use crate::wire::{encode_frame, Frame, WireHeader};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// One side of an in-memory link
pub struct MemoryTransport {
    outbound: Sender<Bytes>,
    inbound: Receiver<Bytes>,
    reliable: bool,
    drop_next: AtomicUsize,
    drop_all: AtomicBool,
    metrics: MetricsTracker,
}

impl MemoryTransport {
    /// Two connected endpoints; neither claims native reliability
    pub fn pair() -> (Self, Self) {
        Self::pair_with(false)
    }

    /// Two connected endpoints reporting `reliable` from `is_reliable`
    pub fn pair_with(reliable: bool) -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            Self::new(a_tx, b_rx, reliable),
            Self::new(b_tx, a_rx, reliable),
        )
    }

    fn new(outbound: Sender<Bytes>, inbound: Receiver<Bytes>, reliable: bool) -> Self {
        Self {
            outbound,
            inbound,
            reliable,
            drop_next: AtomicUsize::new(0),
            drop_all: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        }
    }

    /// Silently lose the next `count` outbound frames
    pub fn drop_next(&self, count: usize) {
        self.drop_next.store(count, Ordering::SeqCst);
    }

    /// Lose every outbound frame until switched off
    pub fn set_drop_all(&self, drop_all: bool) {
        self.drop_all.store(drop_all, Ordering::SeqCst);
    }

    /// Push raw bytes to the peer without framing
    pub fn send_raw(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes = bytes.into();
        let len = bytes.len();
        self.outbound
            .send(bytes)
            .map_err(|_| NetworkError::transport("memory peer disconnected"))?;
        self.metrics.record_send(len);
        Ok(())
    }

    fn should_drop(&self) -> bool {
        if self.drop_all.load(Ordering::SeqCst) {
            return true;
        }
        self.drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(header, payload)?;
        if self.should_drop() {
            self.metrics.record_drop();
            debug!(id = header.id, seq = header.seq, "Dropping outbound frame");
            return Ok(());
        }
        trace!(id = header.id, seq = header.seq, len = frame.len(), "Memory send");
        self.send_raw(frame.freeze())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>> {
        let bytes = match self.inbound.recv_timeout(timeout) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.metrics.record_error();
                return Err(NetworkError::transport("memory peer disconnected"));
            }
        };

        let len = bytes.len();
        match Frame::from_contiguous(bytes) {
            Ok(frame) => {
                self.metrics.record_receive(len);
                Ok(Some(frame))
            }
            Err(e) => {
                self.metrics.record_protocol_error();
                Err(e.into())
            }
        }
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Memory
    }

    fn stats(&self) -> TransportStats {
        self.metrics.snapshot()
    }
}
