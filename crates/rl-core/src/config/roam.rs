//! roamlink configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::serde_utils::{duration_millis, duration_secs};
use crate::target::DEFAULT_HANDSHAKE_PORT;
use crate::types::ConnectionToken;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoamConfig {
    /// Control channel settings
    pub ssh: SshConfig,
    /// Handshake service settings
    pub handshake: HandshakeConfig,
    /// Remote agent bootstrap settings
    pub agent: AgentConfig,
    /// UDP transport settings
    pub transport: TransportConfig,
    /// Reconnect policy
    pub reconnect: ReconnectConfig,
}

/// How to treat server host keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Trust and record unknown hosts; reject changed keys
    #[default]
    AcceptNew,
    /// Only hosts already in known_hosts
    Strict,
    /// Skip verification entirely
    AcceptAny,
}

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Login user when the authority names none (defaults to the local user)
    pub user: Option<String>,

    /// Private key tried before the SSH agent
    pub identity_file: Option<PathBuf>,

    /// TCP connect plus authentication timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Server host key verification
    pub host_key_policy: HostKeyPolicy,

    /// known_hosts file (defaults to ~/.ssh/known_hosts)
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            identity_file: None,
            connect_timeout: Duration::from_secs(15),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts: None,
        }
    }
}

impl SshConfig {
    /// The login user for a target, given its explicit user if any
    pub fn user_for(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.user.clone())
            .unwrap_or_else(whoami::username)
    }
}

/// Handshake service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Command that starts the transport server; `{port}` and `{port_end}`
    /// are substituted
    pub command: String,

    /// First UDP port offered to the server
    pub port: u16,

    /// Width of the offered port range
    pub port_range: u16,

    /// How long to wait for the connect line
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            command: "mosh-server new -s -c 256 -l LANG=en_US.UTF-8 -p {port}:{port_end}"
                .to_string(),
            port: DEFAULT_HANDSHAKE_PORT,
            port_range: 999,
            timeout: Duration::from_secs(30),
        }
    }
}

impl HandshakeConfig {
    /// Render the command for a first port
    pub fn render(&self, port: u16) -> String {
        let end = port.saturating_add(self.port_range);
        self.command
            .replace("{port_end}", &end.to_string())
            .replace("{port}", &port.to_string())
    }
}

/// Remote agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Whether to bootstrap an agent at all
    pub enabled: bool,

    /// Commit id of the agent build; bootstrap is skipped when unset
    pub version: Option<String>,

    /// Release channel in the download URL
    pub quality: String,

    /// Host serving agent archives
    pub update_host: String,

    /// Remote directory holding one subdirectory per version.
    /// Shell variables such as `$HOME` are expanded remotely.
    pub install_root: String,

    /// Entry point relative to the version directory
    pub server_binary: String,

    /// Timeout for short probes (architecture, installed check)
    #[serde(with = "duration_secs")]
    pub exec_timeout: Duration,

    /// Timeout for the download and unpack script
    #[serde(with = "duration_secs")]
    pub install_timeout: Duration,

    /// Timeout for the agent to report its port
    #[serde(with = "duration_secs")]
    pub start_timeout: Duration,

    /// Fixed connection token; a random one is generated when unset
    pub connection_token: Option<ConnectionToken>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: None,
            quality: "stable".to_string(),
            update_host: "update.code.visualstudio.com".to_string(),
            install_root: "$HOME/.vscode-server/bin".to_string(),
            server_binary: "bin/code-server".to_string(),
            exec_timeout: Duration::from_secs(30),
            install_timeout: Duration::from_secs(120),
            start_timeout: Duration::from_secs(60),
            connection_token: None,
        }
    }
}

/// UDP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest datagram the codec may emit
    pub mtu: usize,

    /// Codec tick interval
    #[serde(rename = "tick_interval_ms", with = "duration_millis")]
    pub tick_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: 1280,
            tick_interval: Duration::from_millis(50),
        }
    }
}

/// Reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay schedule between attempts
    pub backoff: BackoffConfig,

    /// Give up after this many consecutive failed attempts (0 = never)
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_attempts: 10,
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis", rename = "initial_ms")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis", rename = "max_ms")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
