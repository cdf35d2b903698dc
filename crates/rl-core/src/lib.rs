//! rl-core: Core types and configuration for roamlink
//!
//! This crate provides the connection target parser, configuration
//! structures, shared domain types and the error taxonomy used by the
//! remote-bootstrap and session crates.

pub mod config;
pub mod error;
pub mod target;
pub mod time;
pub mod types;

pub use config::RoamConfig;
pub use error::{ChannelError, ChannelErrorKind, ConfigError, ExecError, TargetParseError};
pub use target::ConnectionTarget;
pub use types::{AgentInfo, Architecture, ConnectionToken};
