//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding datagram frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown frame kind byte
    #[error("Unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Datagram shorter than its header claims
    #[error("Truncated datagram: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Trailing bytes after the declared payload
    #[error("Datagram has {0} trailing bytes")]
    TrailingBytes(usize),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a transport codec
#[derive(Error, Debug)]
pub enum CodecError {
    /// The MTU cannot fit a header plus at least one payload byte
    #[error("MTU {mtu} is too small (minimum {min})")]
    InvalidMtu { mtu: usize, min: usize },

    /// The codec handle was already released
    #[error("Codec already released")]
    Released,

    /// Datagram could not be decoded
    #[error("Malformed datagram: {0}")]
    Malformed(#[from] ProtocolError),

    /// Engine-specific failure
    #[error("Codec engine error: {0}")]
    Engine(String),
}
