//! Transport Layer
//!
//! One blocking send/receive contract for every backend. A transport moves
//! whole frames: `send` writes a header plus payload, `receive` waits up to
//! a timeout for the next complete frame. Higher layers (tracking, retry)
//! are decorators over this same trait.

use crate::error::Result;
use crate::wire::{Frame, WireHeader};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod memory;
pub mod metrics;
pub mod tcp;
pub mod tracked;
pub mod udp;

pub use memory::MemoryTransport;
pub use metrics::{MetricsTracker, TransportStats};
pub use tcp::{TcpConfig, TcpRole, TcpTransport};
pub use tracked::TrackedTransport;
pub use udp::{UdpConfig, UdpTransport};

/// Send/receive contract implemented by every backend
pub trait Transport: Send + Sync {
    /// Send one frame
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one frame; `Ok(None)` when nothing arrived
    ///
    /// A malformed frame is returned as `NetworkError::Protocol` after it has
    /// been discarded, so the caller can report it and keep receiving.
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>>;

    /// Whether the backend itself guarantees delivery
    fn is_reliable(&self) -> bool {
        false
    }

    fn transport_type(&self) -> TransportType;

    fn stats(&self) -> TransportStats;
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// UDP datagrams
    Udp,
    /// TCP byte stream
    Tcp,
    /// In-process channel pair
    Memory,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportType::Udp => "udp",
            TransportType::Tcp => "tcp",
            TransportType::Memory => "memory",
        };
        f.write_str(name)
    }
}
