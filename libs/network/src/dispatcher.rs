//! Dispatcher
//!
//! Frames a serialized payload for an endpoint and hands it to the
//! configured transport.

use crate::error::{NetworkError, Result};
use crate::transport::Transport;
use crate::wire::{SequenceGenerator, WireHeader, ACK_ID};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// Outbound framing with a per-sender sequence counter
#[derive(Default)]
pub struct Dispatcher {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    sequence: SequenceGenerator,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        let dispatcher = Self::new();
        dispatcher.set_transport(transport);
        dispatcher
    }

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn has_transport(&self) -> bool {
        self.transport.read().is_some()
    }

    /// Reserve a sequence number for a later `dispatch_with_seq`
    pub fn next_sequence(&self) -> u16 {
        self.sequence.next()
    }

    /// Frame `payload` for endpoint `id` and send it
    ///
    /// Returns the sequence number used.
    pub fn dispatch(&self, payload: &[u8], id: u16) -> Result<u16> {
        let transport = self.transport()?;
        let seq = self.sequence.next();
        Self::send(&*transport, payload, id, seq)?;
        Ok(seq)
    }

    /// Send under a sequence number reserved with `next_sequence`
    pub fn dispatch_with_seq(&self, payload: &[u8], id: u16, seq: u16) -> Result<()> {
        let transport = self.transport()?;
        Self::send(&*transport, payload, id, seq)
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        // Clone out so the send runs without the lock.
        self.transport
            .read()
            .clone()
            .ok_or_else(|| NetworkError::configuration("no transport configured", Some("transport")))
    }

    fn send(transport: &dyn Transport, payload: &[u8], id: u16, seq: u16) -> Result<()> {
        if id == ACK_ID {
            return Err(NetworkError::configuration(
                format!("endpoint id {ACK_ID} is reserved for acknowledgments"),
                Some("id"),
            ));
        }
        let header = WireHeader::for_payload(id, seq, payload)?;
        trace!(id, seq, len = payload.len(), "Dispatching frame");
        transport.send(&header, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    #[test]
    fn test_no_transport_is_configuration_error() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.has_transport());
        assert!(matches!(
            dispatcher.dispatch(b"x", 1),
            Err(NetworkError::Configuration { .. })
        ));
    }

    #[test]
    fn test_dispatch_frames_payload_with_increasing_seq() {
        let (a, b) = MemoryTransport::pair();
        let dispatcher = Dispatcher::with_transport(Arc::new(a));
        assert!(dispatcher.has_transport());

        let first = dispatcher.dispatch(b"one", 42).unwrap();
        let second = dispatcher.dispatch(b"two", 42).unwrap();
        assert_eq!(second, first.wrapping_add(1));

        let frame = b.receive(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(frame.header.id, 42);
        assert_eq!(frame.header.seq, first);
        assert_eq!(frame.header.length, 3);
        assert_eq!(&frame.payload[..], b"one");
    }

    #[test]
    fn test_rejects_reserved_id_and_oversized_payload() {
        let (a, _b) = MemoryTransport::pair();
        let dispatcher = Dispatcher::with_transport(Arc::new(a));

        assert!(matches!(
            dispatcher.dispatch(b"x", ACK_ID),
            Err(NetworkError::Configuration { .. })
        ));
        let big = vec![0u8; 70_000];
        assert!(matches!(
            dispatcher.dispatch(&big, 1),
            Err(NetworkError::Protocol(ProtocolError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn test_sequence_wraps_after_65536_sends() {
        let (a, _b) = MemoryTransport::pair();
        a.set_drop_all(true);
        let dispatcher = Dispatcher::with_transport(Arc::new(a));

        let first = dispatcher.dispatch(&[], 1).unwrap();
        for _ in 1..65_536 {
            dispatcher.dispatch(&[], 1).unwrap();
        }
        assert_eq!(dispatcher.dispatch(&[], 1).unwrap(), first);
    }
}
