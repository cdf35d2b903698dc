//! Datagram header encoding/decoding for the plain codec
//!
//! Every datagram starts with an 8-byte header:
//! - sequence: 4 bytes (u32, big-endian)
//! - kind: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian)
//!
//! A datagram is self-contained: the payload must be exactly
//! `payload_length` bytes with nothing after it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Size of the datagram header in bytes
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Kind of payload carried by a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Application bytes, ordered by sequence number
    Data = 0x01,
    /// Keepalive with no payload
    Heartbeat = 0x02,
}

impl FrameKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Datagram header containing ordering and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Sender-assigned sequence number
    pub sequence: u32,
    /// Kind of payload
    pub kind: FrameKind,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl DatagramHeader {
    /// Create a new datagram header
    pub fn new(sequence: u32, kind: FrameKind, payload_length: u32) -> Self {
        Self {
            sequence,
            kind,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.sequence);
        dst.put_u8(self.kind.as_u8());
        // payload_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the frame kind is unknown.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the kind first so a bad header consumes nothing
        let kind_byte = src[4];
        let kind =
            FrameKind::from_u8(kind_byte).ok_or(ProtocolError::UnknownFrameKind(kind_byte))?;

        let sequence = src.get_u32();
        let _ = src.get_u8();
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            sequence,
            kind,
            payload_length,
        }))
    }
}

/// One decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sequence number from the header
    pub sequence: u32,
    /// Kind of payload
    pub kind: FrameKind,
    /// Payload bytes
    pub payload: Bytes,
}

impl Datagram {
    /// Create a data datagram
    pub fn data(sequence: u32, payload: Bytes) -> Self {
        Self {
            sequence,
            kind: FrameKind::Data,
            payload,
        }
    }

    /// Create a heartbeat datagram
    pub fn heartbeat(sequence: u32) -> Self {
        Self {
            sequence,
            kind: FrameKind::Heartbeat,
            payload: Bytes::new(),
        }
    }
}

/// Codec turning a single UDP payload into a [`Datagram`] and back
#[derive(Debug, Default)]
pub struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = Datagram;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let total = src.len();
        let header = match DatagramHeader::decode(src)? {
            Some(h) => h,
            None => {
                return Err(ProtocolError::Truncated {
                    expected: HEADER_SIZE,
                    actual: total,
                })
            }
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE + payload_len,
                actual: total,
            });
        }
        if src.len() > payload_len {
            return Err(ProtocolError::TrailingBytes(src.len() - payload_len));
        }

        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Datagram {
            sequence: header.sequence,
            kind: header.kind,
            payload,
        }))
    }
}

impl Encoder<Datagram> for DatagramCodec {
    type Error = ProtocolError;

    fn encode(&mut self, datagram: Datagram, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = datagram.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        DatagramHeader::new(datagram.sequence, datagram.kind, payload_len as u32).encode(dst);
        dst.extend_from_slice(&datagram.payload);
        Ok(())
    }
}
