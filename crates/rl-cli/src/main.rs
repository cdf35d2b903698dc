//! roamlink CLI
//!
//! - `connect`: resolve an authority and pipe stdio through its session
//! - `resolve`: run the pipeline once and print the session
//! - `config`: show, create or locate the configuration file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roamlink::commands::{self, Overrides};
use rl_session::SessionOrchestrator;

#[derive(Parser)]
#[command(name = "roamlink")]
#[command(author, version, about = "Roaming UDP remote sessions bootstrapped over SSH")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "ROAMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct SessionArgs {
    /// Remote authority, e.g. ssh-udp+user@host:22
    authority: String,

    /// Login user when the authority names none
    #[arg(short, long)]
    user: Option<String>,

    /// Private key tried before the SSH agent
    #[arg(short, long, env = "ROAMLINK_IDENTITY_FILE")]
    identity_file: Option<PathBuf>,

    /// Agent commit id to install and start
    #[arg(long)]
    agent_version: Option<String>,

    /// Skip the agent bootstrap
    #[arg(long)]
    no_agent: bool,
}

impl SessionArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            user: self.user.clone(),
            identity_file: self.identity_file.clone(),
            agent_version: self.agent_version.clone(),
            no_agent: self.no_agent,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Open a session and pipe stdin/stdout through it
    Connect {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Resolve an authority and print the session parameters
    Resolve {
        #[command(flatten)]
        session: SessionArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries channel bytes, so logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Connect { session } => {
            let config = commands::effective_config(config_path, &session.overrides());
            let orchestrator = commands::build_orchestrator(config);
            run_until_signal(
                Arc::clone(&orchestrator),
                commands::connect_command(Arc::clone(&orchestrator), &session.authority),
            )
            .await?;
        }

        Commands::Resolve { session, json } => {
            let config = commands::effective_config(config_path, &session.overrides());
            let orchestrator = commands::build_orchestrator(config);
            run_until_signal(
                Arc::clone(&orchestrator),
                commands::resolve_command(Arc::clone(&orchestrator), &session.authority, json),
            )
            .await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
            ConfigAction::Path => commands::config_path(config_path),
        },
    }

    Ok(())
}

/// Run `command`, shutting the orchestrator down on Ctrl+C or SIGTERM
async fn run_until_signal<F>(orchestrator: Arc<SessionOrchestrator>, command: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let result = tokio::select! {
        result = command => result,
        _ = shutdown_signal() => Ok(()),
    };
    orchestrator.shutdown();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
