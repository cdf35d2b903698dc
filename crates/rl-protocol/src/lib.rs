//! rl-protocol: Wire-level pieces of roamlink
//!
//! This crate holds everything that interprets bytes or text coming from a
//! remote host: the handshake line printed by the transport server, the
//! ordered recognizer tables used to scrape listening ports out of process
//! output, and the contract every transport codec implements.

pub mod codec;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod plain;

pub use codec::{CodecFactory, CodecStats, TransportCodec};
pub use discovery::{parse_port, PortDiscovery, PortMatch, PortPattern, Recognizer, AGENT_PORT_PATTERNS};
pub use error::{CodecError, ProtocolError};
pub use frame::{Datagram, DatagramCodec, DatagramHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use handshake::{redact, HandshakeRecognizer, HandshakeResult, SessionKey, HANDSHAKE_MARKER};
pub use plain::{PlainCodec, PlainCodecFactory};
