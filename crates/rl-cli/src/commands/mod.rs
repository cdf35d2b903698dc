//! CLI command implementations

mod config;
mod connect;
mod resolve;

pub use config::{config_init, config_path, config_show};
pub use connect::connect_command;
pub use resolve::resolve_command;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rl_core::config::{self as core_config, RoamConfig};
use rl_protocol::PlainCodecFactory;
use rl_remote::SshConnector;
use rl_session::SessionOrchestrator;

use crate::output::print_warning;

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub agent_version: Option<String>,
    pub no_agent: bool,
}

impl Overrides {
    /// Write the overrides into `config`
    pub fn apply(&self, config: &mut RoamConfig) {
        if let Some(user) = &self.user {
            config.ssh.user = Some(user.clone());
        }
        if let Some(path) = &self.identity_file {
            config.ssh.identity_file = Some(path.clone());
        }
        if let Some(version) = &self.agent_version {
            config.agent.version = Some(version.clone());
        }
        if self.no_agent {
            config.agent.enabled = false;
        }
    }
}

/// Resolve the config file location
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(core_config::default_config_path)
}

/// Load the config for running commands
///
/// A missing file means defaults; an unreadable one is reported and
/// replaced by defaults so a broken file never blocks a connection.
pub fn effective_config(explicit: Option<&Path>, overrides: &Overrides) -> RoamConfig {
    let path = config_file(explicit);
    let mut config = core_config::load_or_default(&path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", path, e);
        print_warning(&format!("Ignoring invalid config {:?}: {}", path, e));
        RoamConfig::default()
    });
    overrides.apply(&mut config);

    if config.agent.enabled && config.agent.version.is_none() {
        tracing::warn!("No agent version configured; sessions will start without the agent");
    }
    config
}

/// Warning for a handshake command whose server encrypts its datagrams
///
/// Stock `mosh-server` speaks an encrypted protocol that the plain framing
/// codec cannot read; sessions would resolve but never exchange data.
pub fn plain_codec_warning(config: &RoamConfig) -> Option<String> {
    let program = config.handshake.command.split_whitespace().next()?;
    let name = Path::new(program).file_name()?.to_str()?;
    (name == "mosh-server").then(|| {
        format!(
            "Handshake command '{}' starts an encrypted transport server, but roamlink frames datagrams in plain text; \
             point [handshake] command at a plain-framing server",
            program
        )
    })
}

/// Orchestrator wired to SSH and the plain framing codec
pub fn build_orchestrator(config: RoamConfig) -> Arc<SessionOrchestrator> {
    if let Some(warning) = plain_codec_warning(&config) {
        tracing::warn!("{}", warning);
        print_warning(&warning);
    }
    Arc::new(SessionOrchestrator::new(
        config,
        Arc::new(SshConnector::new()),
        Arc::new(PlainCodecFactory),
    ))
}
