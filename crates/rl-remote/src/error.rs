//! Errors for output watching and agent bootstrap

use std::time::Duration;

use thiserror::Error;

use rl_core::{ChannelError, ExecError};

/// Failure to recognize a value in streaming command output
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The command could not be started
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Nothing matched within the time budget
    #[error("No match in command output after {elapsed:?}")]
    Timeout {
        /// Time budget that ran out
        elapsed: Duration,
        /// Output accumulated so far
        output: String,
    },

    /// The command ended before anything matched
    #[error("Process exited ({}) before reporting the expected line", describe_exit(*.code))]
    PrematureExit {
        /// Exit status, if one was reported
        code: Option<u32>,
        /// Everything the process wrote
        output: String,
    },
}

fn describe_exit(code: Option<u32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no status".to_string(),
    }
}

impl DiscoveryError {
    /// Output accumulated before the failure
    pub fn output(&self) -> &str {
        match self {
            DiscoveryError::Timeout { output, .. } | DiscoveryError::PrematureExit { output, .. } => {
                output
            }
            DiscoveryError::Channel(_) => "",
        }
    }
}

/// Agent bootstrap failures
///
/// These never fail a resolve; the pipeline continues without an agent.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// No agent version configured
    #[error("No agent version configured")]
    NoVersion,

    /// Version string unsafe to place in a shell command
    #[error("Invalid agent version '{0}'")]
    InvalidVersion(String),

    /// The install script failed
    #[error("Agent install failed: {0}")]
    Install(#[source] ExecError),

    /// The agent did not report a listening port in time
    #[error("Agent did not report a port within {0:?}")]
    StartTimeout(Duration),

    /// The agent exited before reporting a port
    #[error("Agent exited before reporting a port (code {code:?})")]
    PrematureExit {
        /// Exit status, if known
        code: Option<u32>,
        /// Tail of the agent log
        output: String,
    },

    /// The start command could not be issued
    #[error("Could not start agent: {0}")]
    Channel(#[from] ChannelError),
}

impl From<DiscoveryError> for BootstrapError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Channel(e) => BootstrapError::Channel(e),
            DiscoveryError::Timeout { elapsed, .. } => BootstrapError::StartTimeout(elapsed),
            DiscoveryError::PrematureExit { code, output } => {
                BootstrapError::PrematureExit { code, output }
            }
        }
    }
}

impl BootstrapError {
    /// Remediation hint shown to the user
    pub fn hint(&self) -> &'static str {
        match self {
            BootstrapError::NoVersion => {
                "Set agent.version in the config file or pass --agent-version."
            }
            BootstrapError::InvalidVersion(_) => {
                "Agent versions are commit ids made of letters, digits, dots and dashes."
            }
            BootstrapError::Install(_) => {
                "Check that the remote host can reach the update host and has curl or wget and tar."
            }
            BootstrapError::StartTimeout(_) | BootstrapError::PrematureExit { .. } => {
                "Inspect the agent log under the install directory on the remote host."
            }
            BootstrapError::Channel(e) => e.hint(),
        }
    }
}
