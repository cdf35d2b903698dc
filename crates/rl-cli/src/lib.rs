//! roamlink: Command-line interface for roaming remote sessions
//!
//! Resolves `ssh-udp+user@host` authorities through the session
//! orchestrator and pipes the resulting message channel over stdio.

pub mod commands;
pub mod output;
