//! Output formatting for the console
//!
//! Renders server replies as human-readable terminal output.

use tabled::{settings::Style, Table, Tabled};

use rp_protocol::SessionEntry;

/// Format the session list as an ASCII table
pub fn format_sessions(entries: &[SessionEntry]) -> String {
    if entries.is_empty() {
        return "No sessions connected".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "ID")]
        id: u64,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "IDLE")]
        idle: String,
    }

    let rows: Vec<SessionRow> = entries
        .iter()
        .map(|e| SessionRow {
            id: e.id.as_u64(),
            state: e.state.to_string(),
            idle: format_idle(e.idle_secs),
        })
        .collect();

    Table::new(rows).with(Style::modern()).to_string()
}

/// Format a single session's status line
pub fn format_status(entry: &SessionEntry) -> String {
    format!(
        "session {}: {} (last heartbeat {} ago)",
        entry.id,
        entry.state,
        format_idle(entry.idle_secs)
    )
}

/// Format a relay report
pub fn format_dispatched(delivered: usize, failed: usize) -> String {
    if failed == 0 {
        format!("delivered to {} session(s)", delivered)
    } else {
        format!(
            "delivered to {} session(s), {} delivery failure(s)",
            delivered, failed
        )
    }
}

fn format_idle(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}
