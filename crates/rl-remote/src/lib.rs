//! rl-remote: Remote side of the roamlink session pipeline
//!
//! Opens the SSH control channel, runs commands on the remote host, watches
//! streaming output for dynamic connection parameters and installs and
//! starts the remote agent.

pub mod auth;
pub mod bootstrap;
pub mod channel;
pub mod error;
pub mod executor;
pub mod ssh;
pub mod watcher;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bootstrap::EnvironmentBootstrapper;
pub use channel::{ConnectParams, ControlChannel, ControlConnector, ExecEvent, ExecStream};
pub use error::{BootstrapError, DiscoveryError};
pub use executor::{RemoteExecutor, DEFAULT_EXEC_TIMEOUT};
pub use ssh::SshConnector;
pub use watcher::{watch_output, Recognized};
