//! UDP Transport
//!
//! One frame per datagram over a blocking `std::net::UdpSocket`. With a
//! `remote_address` the socket is connected; without one it replies to the
//! most recent sender, which is enough for a server answering one peer.

use super::{MetricsTracker, Transport, TransportStats, TransportType};
use crate::error::{NetworkError, Result};
use crate::wire::{encode_frame, Frame, WireHeader, HEADER_SIZE, MAX_PAYLOAD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// UDP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Local address to bind to
    pub bind_address: SocketAddr,
    /// Remote address for connected mode (optional)
    pub remote_address: Option<SocketAddr>,
    /// Maximum datagram size accepted or sent
    pub max_datagram_size: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            remote_address: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl UdpConfig {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Self::default()
        }
    }

    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote_address = Some(remote);
        self
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(NetworkError::configuration(
                format!("UDP datagram size cannot exceed {MAX_DATAGRAM_SIZE} bytes"),
                Some("max_datagram_size"),
            ));
        }
        if self.max_datagram_size < HEADER_SIZE {
            return Err(NetworkError::configuration(
                "UDP datagram size must fit a frame header",
                Some("max_datagram_size"),
            ));
        }
        Ok(())
    }
}

struct ReceiveState {
    buffer: Vec<u8>,
    read_timeout: Option<Duration>,
}

/// Datagram transport
pub struct UdpTransport {
    config: UdpConfig,
    socket: UdpSocket,
    local_addr: SocketAddr,
    /// Last sender seen, used as the destination in unconnected mode
    peer: Mutex<Option<SocketAddr>>,
    receive: Mutex<ReceiveState>,
    metrics: MetricsTracker,
}

impl UdpTransport {
    /// Bind (and optionally connect) the socket
    pub fn bind(config: UdpConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_address).map_err(|e| {
            NetworkError::io(
                format!("Failed to bind UDP socket on {}", config.bind_address),
                e,
            )
        })?;

        if let Some(remote) = config.remote_address {
            socket.connect(remote).map_err(|e| {
                NetworkError::io(format!("Failed to connect UDP socket to {remote}"), e)
            })?;
            info!(remote = %remote, "UDP socket connected");
        }

        let local_addr = socket.local_addr()?;
        info!(local = %local_addr, "UDP transport bound");

        // One spare byte detects oversized datagrams instead of truncating.
        let buffer = vec![0u8; config.max_datagram_size + 1];
        Ok(Self {
            peer: Mutex::new(config.remote_address),
            config,
            socket,
            local_addr,
            receive: Mutex::new(ReceiveState {
                buffer,
                read_timeout: None,
            }),
            metrics: MetricsTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }
}

impl Transport for UdpTransport {
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(header, payload)?;
        if frame.len() > self.config.max_datagram_size {
            return Err(crate::error::ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_datagram_size.saturating_sub(HEADER_SIZE).min(MAX_PAYLOAD),
            }
            .into());
        }

        let sent = if self.config.remote_address.is_some() {
            self.socket.send(&frame)
        } else {
            let peer = (*self.peer.lock()).ok_or_else(|| {
                NetworkError::configuration(
                    "UDP transport has no remote address and no peer yet",
                    Some("remote_address"),
                )
            })?;
            self.socket.send_to(&frame, peer)
        };

        match sent {
            Ok(bytes) => {
                self.metrics.record_send(bytes);
                trace!(id = header.id, seq = header.seq, bytes, "UDP send");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error();
                Err(NetworkError::transport_with_source("Failed to send UDP datagram", e))
            }
        }
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut state = self.receive.lock();

        // A zero read timeout is rejected by the OS.
        let timeout = timeout.max(Duration::from_millis(1));
        if state.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            state.read_timeout = Some(timeout);
        }

        let (len, from) = match self.socket.recv_from(&mut state.buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => {
                self.metrics.record_error();
                return Err(NetworkError::transport_with_source("Failed to receive UDP datagram", e));
            }
        };

        match Frame::decode(&state.buffer[..len]) {
            Ok(frame) => {
                // Only a well-formed frame may redirect replies.
                if self.config.remote_address.is_none() {
                    *self.peer.lock() = Some(from);
                }
                self.metrics.record_receive(len);
                Ok(Some(frame))
            }
            Err(e) => {
                self.metrics.record_protocol_error();
                debug!(from = %from, error = %e, "Discarding malformed datagram");
                Err(e.into())
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Udp
    }

    fn stats(&self) -> TransportStats {
        self.metrics.snapshot()
    }
}
