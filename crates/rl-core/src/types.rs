//! Core domain types

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use rl_protocol::redact;

/// Length in bytes of a generated connection token (hex-encoded to twice this)
pub const CONNECTION_TOKEN_BYTES: usize = 16;

/// CPU architecture of a remote host, as named in agent download URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 64-bit x86
    X64,
    /// 64-bit ARM
    Arm64,
    /// 32-bit ARM with hardware float
    Armhf,
}

impl Architecture {
    /// Map a `uname -m` machine type
    ///
    /// Returns `None` for machine types without a known mapping; callers
    /// decide the fallback.
    pub fn from_machine(machine: &str) -> Option<Self> {
        match machine.trim() {
            "x86_64" | "amd64" => Some(Self::X64),
            "aarch64" | "arm64" => Some(Self::Arm64),
            "armv7l" | "armv6l" => Some(Self::Armhf),
            _ => None,
        }
    }

    /// Name used in download URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret token the agent requires from connecting clients
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    /// Generate a random token
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONNECTION_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap a caller-supplied token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The full token, for command lines
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionToken({})", redact(&self.0))
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.0))
    }
}

/// A running remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Loopback port the agent listens on
    pub listen_port: u16,
    /// Token clients must present
    pub connection_token: ConnectionToken,
    /// Remote process ID, when the start script reported one
    pub pid: Option<u32>,
}
