//! Output formatting utilities for the CLI
//!
//! Status messages go to stderr so that stdout stays free for channel bytes
//! and machine-readable output.

use tabled::{settings::Style, Table, Tabled};

use rl_session::SessionSummary;

/// Format sessions as an ASCII table
pub fn format_sessions(sessions: &[SessionSummary]) -> String {
    if sessions.is_empty() {
        return "No active sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "AUTHORITY")]
        authority: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "UDP PORT")]
        udp_port: u16,
        #[tabled(rename = "KEY")]
        key: String,
        #[tabled(rename = "AGENT")]
        agent: String,
        #[tabled(rename = "BRIDGE")]
        bridge: &'static str,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            authority: truncate(&s.authority, 40),
            host: s.host.clone(),
            udp_port: s.udp_port,
            key: s.session_key.clone(),
            agent: format_agent(s.agent_port, s.agent_pid),
            bridge: if s.bridge_active { "open" } else { "-" },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_agent(port: Option<u16>, pid: Option<u32>) -> String {
    match (port, pid) {
        (Some(port), Some(pid)) => format!("127.0.0.1:{} (pid {})", port, pid),
        (Some(port), None) => format!("127.0.0.1:{}", port),
        (None, _) => "unavailable".to_string(),
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_colored(prefix: &str, color: crossterm::style::Color, msg: &str) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_colored("✓ ", crossterm::style::Color::Green, msg);
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    print_colored("✗ ", crossterm::style::Color::Red, msg);
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    print_colored("⚠ ", crossterm::style::Color::Yellow, msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_colored("ℹ ", crossterm::style::Color::Cyan, msg);
}
