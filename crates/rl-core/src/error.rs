//! Core error types for roamlink

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a control channel could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// No answer within the connect timeout
    Timeout,
    /// Server rejected every authentication method
    Authentication,
    /// TCP connection refused
    Refused,
    /// Host name could not be resolved
    Unresolved,
    /// Server host key did not match known_hosts
    HostKey,
    /// A request on an open channel was rejected
    Rejected,
    /// Channel dropped after it was established
    Closed,
    /// Anything else
    Other,
}

/// Control channel errors
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ChannelError {
    /// Classified cause
    pub kind: ChannelErrorKind,
    /// Diagnostic message
    pub message: String,
}

impl ChannelError {
    /// Create a new channel error
    pub fn new(kind: ChannelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Remediation hint shown to the user
    pub fn hint(&self) -> &'static str {
        match self.kind {
            ChannelErrorKind::Timeout => {
                "The host did not answer in time. Check that it is reachable and the SSH port is correct."
            }
            ChannelErrorKind::Authentication => {
                "SSH authentication failed. Check the identity file setting or that your SSH agent holds the right key."
            }
            ChannelErrorKind::Refused => {
                "The connection was refused. Check that sshd is running and the port is correct."
            }
            ChannelErrorKind::Unresolved => {
                "The host name could not be resolved. Check the spelling or your DNS settings."
            }
            ChannelErrorKind::HostKey => {
                "The host key does not match known_hosts. Verify the host and update ~/.ssh/known_hosts."
            }
            ChannelErrorKind::Rejected => {
                "The server refused to run a command. Check that the account has a usable login shell."
            }
            ChannelErrorKind::Closed | ChannelErrorKind::Other => {
                "The SSH connection failed. Try again, or raise the log level for details."
            }
        }
    }
}

/// Remote command execution errors
#[derive(Error, Debug)]
pub enum ExecError {
    /// Channel setup failed
    #[error("Could not run remote command: {0}")]
    Channel(#[from] ChannelError),

    /// The command ran and exited non-zero
    #[error("Remote command exited with code {exit_code}")]
    Failure {
        /// Exit status reported by the remote shell
        exit_code: u32,
        /// Captured stderr for diagnostics
        stderr: String,
    },

    /// The command ended without reporting an exit status
    #[error("Remote command ended without an exit status")]
    NoExitStatus,

    /// No terminal event within the time budget
    #[error("Remote command timed out after {0:?}")]
    Timeout(Duration),
}

/// Authority string parse errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetParseError {
    /// Nothing after the prefix
    #[error("authority is empty")]
    Empty,

    /// No host component
    #[error("missing host in '{0}'")]
    MissingHost(String),

    /// `@` with nothing before it
    #[error("empty user in '{0}'")]
    EmptyUser(String),

    /// Port is not a number in 1-65535
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// Unclosed `[` in an IPv6 literal
    #[error("unterminated IPv6 literal in '{0}'")]
    UnterminatedBracket(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
