//! Session and bridge errors

use std::time::Duration;

use thiserror::Error;

use rl_core::{ChannelError, ChannelErrorKind, TargetParseError};
use rl_protocol::CodecError;
use rl_remote::DiscoveryError;

use crate::orchestrator::ResolveStage;

/// Transport bridge failures
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Host name did not resolve to an address
    #[error("Could not resolve {host}: {message}")]
    Resolve {
        /// Host that failed to resolve
        host: String,
        /// Resolver message
        message: String,
    },

    /// Socket bind, connect or send failed
    #[error("UDP socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Codec could not be created
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The bridge has already ended
    #[error("Bridge has ended")]
    Ended,

    /// The owning session was disposed
    #[error("Session has been disposed")]
    Disposed,
}

/// Hint for UDP traffic that never arrives or cannot be sent
pub const UDP_PORT_HINT: &str =
    "Check that the UDP port range is open between this machine and the remote host.";

impl BridgeError {
    /// Remediation hint shown to the user
    pub fn hint(&self) -> &'static str {
        match self {
            BridgeError::Resolve { .. } => {
                "The remote host name could not be resolved for UDP. Check the spelling or your DNS settings."
            }
            BridgeError::Socket(_) => UDP_PORT_HINT,
            BridgeError::Codec(_) => {
                "The transport rejected the session parameters. Resolve the authority again to get a fresh key."
            }
            BridgeError::Ended => "The channel was replaced or shut down. Reconnect to open a new one.",
            BridgeError::Disposed => "The session was disposed. Resolve the authority again.",
        }
    }
}

/// Why a resolve attempt failed
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The authority string could not be parsed
    #[error("Invalid authority: {0}")]
    InvalidAuthority(#[from] TargetParseError),

    /// Control channel could not be opened or used
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// The handshake service never printed its connect line
    #[error("Timed out after {timeout:?} waiting for the transport server")]
    HandshakeTimeout {
        /// Time budget
        timeout: Duration,
        /// Output seen so far
        output: String,
    },

    /// The handshake service exited without a connect line
    #[error("Transport server exited (code {code:?}) without reporting connection parameters")]
    HandshakeExited {
        /// Exit status, if reported
        code: Option<u32>,
        /// Everything it printed
        output: String,
    },

    /// The session could not be registered; retrying may succeed
    #[error("Session for '{0}' is temporarily unavailable")]
    Unavailable(String),

    /// The orchestrator is shutting down
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

impl From<DiscoveryError> for ResolveError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Channel(e) => ResolveError::Channel(e),
            DiscoveryError::Timeout { elapsed, output } => ResolveError::HandshakeTimeout {
                timeout: elapsed,
                output,
            },
            DiscoveryError::PrematureExit { code, output } => {
                ResolveError::HandshakeExited { code, output }
            }
        }
    }
}

impl ResolveError {
    /// Remediation hint shown to the user
    pub fn hint(&self) -> &'static str {
        match self {
            ResolveError::InvalidAuthority(_) => {
                "Authorities look like ssh-udp+user@host or ssh-udp+host:2222."
            }
            ResolveError::Channel(e) => e.hint(),
            ResolveError::HandshakeTimeout { .. } => {
                "The transport server did not report its port. Check that mosh-server is on the PATH of non-interactive shells."
            }
            ResolveError::HandshakeExited { .. } => {
                "The transport server exited early. Check that mosh-server is installed and that UDP ports in the configured range are free."
            }
            ResolveError::Unavailable(_) => "The session could not be registered. Try again.",
            ResolveError::ShuttingDown => "roamlink is shutting down.",
        }
    }

    /// Whether resolving again may succeed
    ///
    /// Connect and handshake failures are temporary, except for rejected
    /// credentials and host keys which need the user to act first.
    pub fn is_temporary(&self) -> bool {
        match self {
            ResolveError::Channel(e) => !matches!(
                e.kind,
                ChannelErrorKind::Authentication | ChannelErrorKind::HostKey
            ),
            ResolveError::HandshakeTimeout { .. }
            | ResolveError::HandshakeExited { .. }
            | ResolveError::Unavailable(_) => true,
            ResolveError::InvalidAuthority(_) | ResolveError::ShuttingDown => false,
        }
    }

    /// Pipeline stage the failure belongs to
    pub fn stage(&self) -> ResolveStage {
        match self {
            ResolveError::InvalidAuthority(_) | ResolveError::ShuttingDown => ResolveStage::Idle,
            ResolveError::Channel(_) => ResolveStage::ConnectingControl,
            ResolveError::HandshakeTimeout { .. } | ResolveError::HandshakeExited { .. } => {
                ResolveStage::StartingHandshake
            }
            ResolveError::Unavailable(_) => ResolveStage::SessionReady,
        }
    }

    /// Process output captured before the failure, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            ResolveError::HandshakeTimeout { output, .. }
            | ResolveError::HandshakeExited { output, .. } => Some(output),
            _ => None,
        }
    }
}
