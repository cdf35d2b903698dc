//! Transport codec contract
//!
//! The transport bridge never interprets datagrams itself. It hands every
//! inbound datagram, outbound byte chunk and timer tick to a
//! [`TransportCodec`], which owns encryption, sequencing and retransmission.
//! Codecs are obtained from a [`CodecFactory`] injected at construction, so
//! production wiring and tests can supply different engines.

use bytes::Bytes;

use crate::error::CodecError;
use crate::handshake::SessionKey;

/// Traffic counters reported by a codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecStats {
    /// Datagrams accepted by `inbound`
    pub datagrams_in: u64,
    /// Datagrams produced by `outbound` and `tick`
    pub datagrams_out: u64,
    /// Application bytes delivered
    pub bytes_in: u64,
    /// Application bytes accepted for sending
    pub bytes_out: u64,
    /// Datagrams that failed to decode
    pub decode_errors: u64,
}

/// One codec instance, exclusively owned by one bridge
///
/// Implementations must tolerate arbitrary network input: malformed
/// datagrams produce an error or empty output, never a panic.
pub trait TransportCodec: Send {
    /// Decode one received datagram into application bytes
    ///
    /// An empty result means the datagram carried nothing deliverable yet
    /// (heartbeat, out-of-order fragment, duplicate).
    fn inbound(&mut self, datagram: &[u8], now_ms: u64) -> Result<Bytes, CodecError>;

    /// Encode application bytes into zero or more datagrams
    fn outbound(&mut self, data: &[u8], now_ms: u64) -> Result<Vec<Bytes>, CodecError>;

    /// Time-based work: retransmissions and heartbeats
    fn tick(&mut self, now_ms: u64) -> Result<Vec<Bytes>, CodecError>;

    /// Traffic counters
    fn stats(&self) -> CodecStats;

    /// Free engine resources; further calls yield empty output
    fn release(&mut self);
}

/// Creates codec instances for new bridges
pub trait CodecFactory: Send + Sync {
    /// Create a codec keyed by the session key and MTU
    fn create(&self, key: &SessionKey, mtu: usize) -> Result<Box<dyn TransportCodec>, CodecError>;
}
