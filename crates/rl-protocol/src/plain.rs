//! Unencrypted framing codec
//!
//! `PlainCodec` splits outbound bytes into MTU-sized data datagrams, puts
//! inbound data back in sequence order, and emits a heartbeat when the link
//! has been idle for [`HEARTBEAT_INTERVAL_MS`]. It performs no encryption and
//! no retransmission; it exists for loopback testing and for servers started
//! without a cryptographic engine.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{CodecFactory, CodecStats, TransportCodec};
use crate::error::CodecError;
use crate::frame::{Datagram, DatagramCodec, FrameKind, HEADER_SIZE};
use crate::handshake::SessionKey;

/// Idle time after which a heartbeat is sent
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Out-of-order data datagrams held while waiting for a gap to fill.
///
/// Once more than this many are pending the gap is declared lost and
/// delivery skips ahead.
const REORDER_WINDOW: usize = 64;

/// Framing-only codec
#[derive(Debug)]
pub struct PlainCodec {
    /// Largest datagram produced
    mtu: usize,
    /// Frame encoder/decoder
    frames: DatagramCodec,
    /// Sequence number for the next data datagram
    next_sequence: u32,
    /// Next data sequence expected from the peer
    expected_sequence: u32,
    /// Data received ahead of `expected_sequence`
    pending: BTreeMap<u32, Bytes>,
    /// Time of the last datagram we produced
    last_send_ms: Option<u64>,
    stats: CodecStats,
    released: bool,
}

impl PlainCodec {
    /// Create a codec producing datagrams of at most `mtu` bytes
    pub fn new(mtu: usize) -> Result<Self, CodecError> {
        let min = HEADER_SIZE + 1;
        if mtu < min {
            return Err(CodecError::InvalidMtu { mtu, min });
        }

        Ok(Self {
            mtu,
            frames: DatagramCodec,
            next_sequence: 1,
            expected_sequence: 1,
            pending: BTreeMap::new(),
            last_send_ms: None,
            stats: CodecStats::default(),
            released: false,
        })
    }

    fn encode(&mut self, datagram: Datagram) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + datagram.payload.len());
        self.frames.encode(datagram, &mut buf)?;
        self.stats.datagrams_out += 1;
        Ok(buf.freeze())
    }

    /// Deliver everything contiguous from `expected_sequence`
    fn drain_in_order(&mut self, out: &mut BytesMut) {
        while let Some(payload) = self.pending.remove(&self.expected_sequence) {
            out.extend_from_slice(&payload);
            self.expected_sequence = self.expected_sequence.wrapping_add(1);
        }
    }

    fn accept_data(&mut self, sequence: u32, payload: Bytes) -> Bytes {
        // Sequence distance with wraparound; "behind" means duplicate
        let ahead = sequence.wrapping_sub(self.expected_sequence);
        if ahead > u32::MAX / 2 {
            tracing::trace!("Dropping duplicate datagram {}", sequence);
            return Bytes::new();
        }

        self.pending.entry(sequence).or_insert(payload);

        let mut out = BytesMut::new();
        self.drain_in_order(&mut out);

        if self.pending.len() > REORDER_WINDOW {
            if let Some(&oldest) = self.pending.keys().next() {
                tracing::debug!(
                    "Skipping lost datagrams {}..{}",
                    self.expected_sequence,
                    oldest
                );
                self.expected_sequence = oldest;
                self.drain_in_order(&mut out);
            }
        }

        out.freeze()
    }
}

impl TransportCodec for PlainCodec {
    fn inbound(&mut self, datagram: &[u8], _now_ms: u64) -> Result<Bytes, CodecError> {
        if self.released {
            return Ok(Bytes::new());
        }

        let mut buf = BytesMut::from(datagram);
        let decoded = match self.frames.decode(&mut buf) {
            Ok(Some(d)) => d,
            Ok(None) => {
                self.stats.decode_errors += 1;
                return Ok(Bytes::new());
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(e.into());
            }
        };
        self.stats.datagrams_in += 1;

        let delivered = match decoded.kind {
            FrameKind::Heartbeat => Bytes::new(),
            FrameKind::Data => self.accept_data(decoded.sequence, decoded.payload),
        };
        self.stats.bytes_in += delivered.len() as u64;
        Ok(delivered)
    }

    fn outbound(&mut self, data: &[u8], now_ms: u64) -> Result<Vec<Bytes>, CodecError> {
        if self.released {
            return Ok(Vec::new());
        }

        let chunk_size = self.mtu - HEADER_SIZE;
        let mut datagrams = Vec::with_capacity(data.len().div_ceil(chunk_size));
        for chunk in data.chunks(chunk_size) {
            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            datagrams.push(self.encode(Datagram::data(sequence, Bytes::copy_from_slice(chunk)))?);
        }

        if !datagrams.is_empty() {
            self.stats.bytes_out += data.len() as u64;
            self.last_send_ms = Some(now_ms);
        }
        Ok(datagrams)
    }

    fn tick(&mut self, now_ms: u64) -> Result<Vec<Bytes>, CodecError> {
        if self.released {
            return Ok(Vec::new());
        }

        let idle = match self.last_send_ms {
            Some(last) => now_ms.saturating_sub(last) >= HEARTBEAT_INTERVAL_MS,
            None => true,
        };
        if !idle {
            return Ok(Vec::new());
        }

        self.last_send_ms = Some(now_ms);
        Ok(vec![self.encode(Datagram::heartbeat(0))?])
    }

    fn stats(&self) -> CodecStats {
        self.stats
    }

    fn release(&mut self) {
        self.released = true;
        self.pending.clear();
    }
}

/// Factory for [`PlainCodec`]
///
/// The session key is accepted for interface compatibility and otherwise
/// unused, since this codec does not encrypt.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodecFactory;

impl CodecFactory for PlainCodecFactory {
    fn create(&self, key: &SessionKey, mtu: usize) -> Result<Box<dyn TransportCodec>, CodecError> {
        tracing::debug!("Creating plain codec (key {}, mtu {})", key, mtu);
        Ok(Box::new(PlainCodec::new(mtu)?))
    }
}
