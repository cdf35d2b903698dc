//! Resolve command implementation

use std::sync::Arc;

use anyhow::{Context, Result};

use rl_session::SessionOrchestrator;

use crate::output::{format_sessions, print_error, print_info, print_success};

/// Run the pipeline once and print the resulting session
pub async fn resolve_command(
    orchestrator: Arc<SessionOrchestrator>,
    authority: &str,
    json: bool,
) -> Result<()> {
    let resolved = match orchestrator.resolve(authority, 0).await {
        Ok(resolved) => resolved,
        Err(e) => {
            print_error(&format!("Failed to resolve {}: {}", authority, e));
            print_info(e.hint());
            return Err(e).with_context(|| format!("Failed to resolve {}", authority));
        }
    };

    let summary = resolved.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_success(&format!(
            "Transport server for {} on udp port {}",
            resolved.host, resolved.udp_port
        ));
        if resolved.agent.is_none() {
            print_info("Agent unavailable; the session runs without it");
        }
        println!("{}", format_sessions(std::slice::from_ref(&summary)));
    }

    orchestrator.shutdown();
    Ok(())
}
