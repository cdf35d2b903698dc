//! rl-session: Session side of the roamlink pipeline
//!
//! The orchestrator resolves an authority into a registered session:
//! it opens the control channel, starts the transport server, bootstraps the
//! remote agent and keeps the result in a registry. Each session lazily
//! opens a UDP transport bridge and exposes it as a message channel.

pub mod backoff;
pub mod bridge;
pub mod error;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
mod testing;

pub use backoff::ExponentialBackoff;
pub use bridge::{ChannelEvent, MessageChannel, MessageSender, TransportBridge};
pub use error::{BridgeError, ResolveError, UDP_PORT_HINT};
pub use orchestrator::{ResolveStage, ResolvedAuthority, SessionConnector, SessionOrchestrator};
pub use session::{Session, SessionRegistry, SessionSummary};
