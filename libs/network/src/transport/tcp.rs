//! TCP Transport
//!
//! Frames over one blocking byte stream. The 8-byte header is the framing:
//! the reader accumulates bytes in a `BytesMut` and splits off complete
//! frames. On a marker mismatch the reader drops bytes up to the next
//! marker so one corrupt frame does not poison the stream.
//!
//! A client reconnects on the next receive after the connection drops; a
//! server accepts the next incoming connection. Frames in flight on a lost
//! connection are gone, so the stream counts as reliable only while it
//! stays up.

use super::{MetricsTracker, Transport, TransportStats, TransportType};
use crate::error::{NetworkError, ProtocolError, Result};
use crate::wire::{encode_frame, Frame, WireHeader, HEADER_SIZE, MARKER};
use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 16 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Which side of the connection this transport is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcpRole {
    Client,
    Server,
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Remote address (client) or bind address (server)
    pub address: SocketAddr,
    pub role: TcpRole,
    pub connect_timeout_ms: u64,
    pub nodelay: bool,
}

impl TcpConfig {
    pub fn client(address: SocketAddr) -> Self {
        Self {
            address,
            role: TcpRole::Client,
            connect_timeout_ms: 5_000,
            nodelay: true,
        }
    }

    pub fn server(address: SocketAddr) -> Self {
        Self {
            role: TcpRole::Server,
            ..Self::client(address)
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

struct Reader {
    stream: Option<TcpStream>,
    buffer: BytesMut,
    read_timeout: Option<Duration>,
}

/// Byte-stream transport
pub struct TcpTransport {
    config: TcpConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Reader>,
    /// Set by a failed write; the reader drops its half on the next receive
    broken: AtomicBool,
    metrics: MetricsTracker,
}

impl TcpTransport {
    /// Connect (client) or bind (server) according to `config.role`
    pub fn open(config: TcpConfig) -> Result<Self> {
        match config.role {
            TcpRole::Client => Self::connect(config),
            TcpRole::Server => Self::listen(config),
        }
    }

    /// Connect to `config.address`
    pub fn connect(config: TcpConfig) -> Result<Self> {
        let stream = connect_stream(&config)?;
        let local_addr = stream.local_addr()?;
        let transport = Self {
            config,
            listener: None,
            local_addr,
            writer: Mutex::new(None),
            reader: Mutex::new(Reader {
                stream: None,
                buffer: BytesMut::with_capacity(READ_CHUNK),
                read_timeout: None,
            }),
            broken: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        };
        transport.install(&mut transport.reader.lock(), stream)?;
        Ok(transport)
    }

    /// Bind `config.address`; the peer is accepted on the first receive
    pub fn listen(config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.address).map_err(|e| {
            NetworkError::io(format!("Failed to bind TCP listener on {}", config.address), e)
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(local = %local_addr, "TCP transport listening");

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            writer: Mutex::new(None),
            reader: Mutex::new(Reader {
                stream: None,
                buffer: BytesMut::with_capacity(READ_CHUNK),
                read_timeout: None,
            }),
            broken: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn install(&self, reader: &mut Reader, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(self.config.nodelay)?;
        let writer = stream.try_clone()?;
        reader.stream = Some(stream);
        reader.buffer.clear();
        reader.read_timeout = None;
        *self.writer.lock() = Some(writer);
        Ok(())
    }

    fn disconnect(&self, reader: &mut Reader) {
        reader.stream = None;
        reader.buffer.clear();
        *self.writer.lock() = None;
    }

    /// Obtain a connection, waiting at most until `deadline`
    fn ensure_connected(&self, reader: &mut Reader, deadline: Instant) -> Result<bool> {
        if reader.stream.is_some() {
            return Ok(true);
        }

        match &self.listener {
            Some(listener) => loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        stream.set_nonblocking(false)?;
                        self.install(reader, stream)?;
                        info!(peer = %peer, "TCP peer accepted");
                        return Ok(true);
                    }
                    Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Ok(false);
                        }
                        std::thread::sleep(ACCEPT_POLL.min(deadline - now));
                    }
                    Err(e) => return Err(NetworkError::io("TCP accept failed", e)),
                }
            },
            None => match connect_stream(&self.config) {
                Ok(stream) => {
                    self.install(reader, stream)?;
                    info!(remote = %self.config.address, "TCP reconnected");
                    Ok(true)
                }
                Err(e) => {
                    debug!(error = %e, "TCP reconnect failed");
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    Ok(false)
                }
            },
        }
    }
}

fn connect_stream(config: &TcpConfig) -> Result<TcpStream> {
    TcpStream::connect_timeout(&config.address, config.connect_timeout()).map_err(|e| {
        NetworkError::io(format!("Failed to connect TCP stream to {}", config.address), e)
    })
}

/// Split the next complete frame off `buffer`
///
/// `Ok(None)` means more bytes are needed. On a bad marker the garbage up
/// to the next candidate marker is discarded and the error returned.
fn take_frame(buffer: &mut BytesMut) -> std::result::Result<Option<Frame>, ProtocolError> {
    if buffer.len() < 2 {
        return Ok(None);
    }

    let marker = BigEndian::read_u16(&buffer[0..2]);
    if marker != MARKER {
        let marker_bytes = MARKER.to_be_bytes();
        let skip = buffer[1..]
            .windows(2)
            .position(|w| w == marker_bytes)
            .map(|i| i + 1)
            // Keep a trailing first marker byte; its partner may be in flight.
            .unwrap_or_else(|| {
                if buffer[buffer.len() - 1] == marker_bytes[0] {
                    buffer.len() - 1
                } else {
                    buffer.len()
                }
            });
        let _ = buffer.split_to(skip);
        return Err(ProtocolError::InvalidMarker {
            found: marker,
            expected: MARKER,
        });
    }

    if buffer.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = WireHeader::decode(&buffer[..HEADER_SIZE])?;
    if buffer.len() < header.frame_len() {
        return Ok(None);
    }
    let frame = buffer.split_to(header.frame_len()).freeze();
    Frame::from_contiguous(frame).map(Some)
}

impl Transport for TcpTransport {
    fn send(&self, header: &WireHeader, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(header, payload)?;
        let mut writer = self.writer.lock();
        let stream = writer
            .as_mut()
            .ok_or_else(|| NetworkError::transport("TCP transport is not connected"))?;

        if let Err(e) = stream.write_all(&frame) {
            self.metrics.record_error();
            // Wakes a reader blocked on the other half of the same socket.
            let _ = stream.shutdown(Shutdown::Both);
            *writer = None;
            self.broken.store(true, Ordering::SeqCst);
            warn!(error = %e, "TCP write failed, dropping connection");
            return Err(NetworkError::transport_with_source("Failed to write TCP frame", e));
        }
        self.metrics.record_send(frame.len());
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut reader = self.reader.lock();
        if self.broken.swap(false, Ordering::SeqCst) {
            self.disconnect(&mut reader);
        }

        loop {
            match take_frame(&mut reader.buffer) {
                Ok(Some(frame)) => {
                    self.metrics.record_receive(frame.header.frame_len());
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_protocol_error();
                    return Err(e.into());
                }
            }

            if !self.ensure_connected(&mut reader, deadline)? {
                return Ok(None);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if reader.read_timeout != Some(remaining) {
                if let Some(stream) = reader.stream.as_ref() {
                    stream.set_read_timeout(Some(remaining))?;
                }
                reader.read_timeout = Some(remaining);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = match reader.stream.as_mut() {
                Some(stream) => stream.read(&mut chunk),
                None => return Ok(None),
            };
            match read {
                Ok(0) => {
                    info!(remote = %self.config.address, "TCP peer closed the connection");
                    self.disconnect(&mut reader);
                    return Ok(None);
                }
                Ok(n) => reader.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) => {
                    self.metrics.record_error();
                    self.disconnect(&mut reader);
                    return Err(NetworkError::transport_with_source("Failed to read TCP stream", e));
                }
            }
        }
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn stats(&self) -> TransportStats {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame_bytes(id: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
        encode_frame(&WireHeader::new(id, seq, payload.len() as u16), payload)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_take_frame_waits_for_complete_frame() {
        let bytes = frame_bytes(4, 2, b"abcd");
        let mut buffer = BytesMut::new();

        buffer.put_slice(&bytes[..6]);
        assert_eq!(take_frame(&mut buffer), Ok(None));
        buffer.put_slice(&bytes[6..]);

        let frame = take_frame(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.header.id, 4);
        assert_eq!(&frame.payload[..], b"abcd");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_frame_resyncs_after_garbage() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(&[0x01, 0x02, 0x03]);
        buffer.put_slice(&frame_bytes(9, 1, b"ok"));

        assert!(matches!(
            take_frame(&mut buffer),
            Err(ProtocolError::InvalidMarker { found: 0x0102, .. })
        ));
        let frame = take_frame(&mut buffer).unwrap().unwrap();
        assert_eq!(frame.header.id, 9);
    }

    #[test]
    fn test_write_failure_drops_connection_and_reconnects() {
        let server = TcpTransport::listen(TcpConfig::server(([127, 0, 0, 1], 0).into())).unwrap();
        let addr = server.local_addr();
        let client = TcpTransport::connect(TcpConfig::client(addr)).unwrap();
        assert!(server.receive(Duration::from_millis(100)).unwrap().is_none());
        drop(server);

        // The first write after the peer closes may still succeed locally.
        let mut failed = false;
        for seq in 0..50 {
            if client.send(&WireHeader::new(1, seq, 0), &[]).is_err() {
                failed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(failed);
        assert!(!client.is_connected());

        let replacement = TcpTransport::listen(TcpConfig::server(addr)).unwrap();
        assert!(client.receive(Duration::from_millis(200)).unwrap().is_none());
        assert!(client.is_connected());

        client.send(&WireHeader::new(1, 99, 2), b"up").unwrap();
        let frame = replacement.receive(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(frame.header.seq, 99);
    }

    #[test]
    fn test_loopback_stream() {
        let server = TcpTransport::listen(TcpConfig::server(([127, 0, 0, 1], 0).into())).unwrap();
        let client = TcpTransport::connect(TcpConfig::client(server.local_addr())).unwrap();
        assert!(client.is_reliable());

        client.send(&WireHeader::new(2, 1, 3), b"one").unwrap();
        client.send(&WireHeader::new(2, 2, 3), b"two").unwrap();

        let first = server.receive(Duration::from_secs(1)).unwrap().unwrap();
        let second = server.receive(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!((first.header.seq, &first.payload[..]), (1, &b"one"[..]));
        assert_eq!((second.header.seq, &second.payload[..]), (2, &b"two"[..]));

        server.send(&WireHeader::ack(2), &[]).unwrap();
        let ack = client.receive(Duration::from_secs(1)).unwrap().unwrap();
        assert!(ack.header.is_ack());
    }
}
