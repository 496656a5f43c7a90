// Colored terminal output for the field table and live status.
//
// main.rs and status.rs delegate here for anything printed to the terminal.

use chrono::Utc;
use colored::Colorize;

use crate::bluesky::types::LiveStatus;
use crate::events::{field_keys, EventKind, FieldPrefixes};
use crate::live::sync::SyncState;

/// Print every event kind with the metadata keys it carries.
pub fn display_field_table(prefixes: &FieldPrefixes) {
    println!("\n{}", "=== Bluesky events ===".bold());

    for kind in EventKind::ALL {
        println!();
        println!("  {}  {}", kind.as_str().cyan().bold(), kind.description().dimmed());
        for key in field_keys(kind, prefixes) {
            println!("    ${key}");
        }
    }
    println!();
}

/// Print the live status as the profile currently shows it.
pub fn display_live_status(status: Option<&LiveStatus>) {
    let Some(status) = status else {
        println!("Live status: {}", "none".dimmed());
        return;
    };

    let state = if status.is_active_at(Utc::now()) {
        "active".green().bold()
    } else if status.is_disabled.unwrap_or(false) {
        "disabled".red()
    } else {
        "inactive".yellow()
    };
    println!("Live status: {} ({})", state, status.status.dimmed());

    match status.expires_at {
        Some(expires_at) => println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("  Expires: {}", "never".dimmed()),
    }
}

/// Print the sync's connection and auto-sync flags.
pub fn display_sync_state(state: &SyncState) {
    let connected = if state.connected {
        "connected".green()
    } else {
        "disconnected".red()
    };
    let auto_sync = if state.is_auto_sync_enabled {
        "on".green()
    } else {
        "off".dimmed()
    };
    println!("Bluesky: {connected}");
    println!("Auto-sync live status: {auto_sync}");
}

pub fn display_succeeded(what: &str) {
    println!("{} {}", "✓".green(), what);
}

pub fn display_failed(what: &str) {
    println!("{} {}", "✗".red(), what);
}
