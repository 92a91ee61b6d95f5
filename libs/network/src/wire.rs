//! Wire Header Framing
//!
//! Every frame is an 8-byte header followed by `length` payload bytes:
//!
//! ```text
//! offset 0: u16 marker   0x55AA
//! offset 2: u16 id       endpoint id, 0 = acknowledgment
//! offset 4: u16 seq      sender-monotonic, wraps at 65536
//! offset 6: u16 length   payload byte count
//! offset 8: payload
//! ```
//!
//! All fields are big-endian regardless of host byte order.

use crate::error::ProtocolError;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU16, Ordering};

/// Frame alignment sentinel
pub const MARKER: u16 = 0x55AA;

/// Reserved endpoint id for acknowledgment frames
pub const ACK_ID: u16 = 0;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest payload a 16-bit length field can describe
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireHeader {
    pub marker: u16,
    pub id: u16,
    pub seq: u16,
    pub length: u16,
}

impl WireHeader {
    /// Header for an application frame
    pub fn new(id: u16, seq: u16, length: u16) -> Self {
        Self {
            marker: MARKER,
            id,
            seq,
            length,
        }
    }

    /// Build a header for `payload`, rejecting payloads over 64 KiB
    pub fn for_payload(id: u16, seq: u16, payload: &[u8]) -> Result<Self, ProtocolError> {
        let length = u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        })?;
        Ok(Self::new(id, seq, length))
    }

    /// Acknowledgment for `seq`
    pub fn ack(seq: u16) -> Self {
        Self::new(ACK_ID, seq, 0)
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.id == ACK_ID
    }

    /// Write the 8 header bytes into `out`
    pub fn encode_into(&self, out: &mut [u8; HEADER_SIZE]) {
        BigEndian::write_u16(&mut out[0..2], self.marker);
        BigEndian::write_u16(&mut out[2..4], self.id);
        BigEndian::write_u16(&mut out[4..6], self.seq);
        BigEndian::write_u16(&mut out[6..8], self.length);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode_into(&mut out);
        out
    }

    /// Parse and validate the marker of the first 8 bytes of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let marker = BigEndian::read_u16(&bytes[0..2]);
        if marker != MARKER {
            return Err(ProtocolError::InvalidMarker {
                found: marker,
                expected: MARKER,
            });
        }
        Ok(Self {
            marker,
            id: BigEndian::read_u16(&bytes[2..4]),
            seq: BigEndian::read_u16(&bytes[4..6]),
            length: BigEndian::read_u16(&bytes[6..8]),
        })
    }

    /// Total encoded frame size
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// One received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: WireHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Decode a self-contained datagram; trailing bytes are rejected
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let header = WireHeader::decode(datagram)?;
        let actual = datagram.len() - HEADER_SIZE;
        if actual != header.length as usize {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                actual,
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&datagram[HEADER_SIZE..]),
        })
    }

    /// Split one frame off an already-validated contiguous buffer
    pub(crate) fn from_contiguous(buffer: Bytes) -> Result<Self, ProtocolError> {
        let header = WireHeader::decode(&buffer)?;
        if buffer.len() != header.frame_len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.length as usize,
                actual: buffer.len().saturating_sub(HEADER_SIZE),
            });
        }
        Ok(Self {
            header,
            payload: buffer.slice(HEADER_SIZE..),
        })
    }
}

/// Encode header and payload into one contiguous buffer
///
/// Fails when the header's length field disagrees with `payload`.
pub fn encode_frame(header: &WireHeader, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    if header.length as usize != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            declared: header.length as usize,
            actual: payload.len(),
        });
    }
    let mut buffer = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buffer.put_slice(&header.to_bytes());
    buffer.put_slice(payload);
    Ok(buffer)
}

/// Per-sender monotonic sequence numbers, wrapping at 65536
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: AtomicU16,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first),
        }
    }

    /// Allocate the next sequence number
    #[inline]
    pub fn next(&self) -> u16 {
        // fetch_add on atomics wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Value the next call to `next` returns
    pub fn peek(&self) -> u16 {
        self.next.load(Ordering::Relaxed)
    }
}
