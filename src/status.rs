// System status display — configuration, login state and current live status.

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::integration::Integration;
use crate::output::terminal;

/// Display integration status to the terminal.
pub async fn show(config: &Config, integration: &Integration) -> Result<()> {
    let settings = config.settings()?;

    match &config.settings_path {
        Some(path) => println!("Settings: {}", path.display()),
        None => println!("Settings: environment"),
    }

    if !settings.has_credentials() {
        println!("Bluesky account: {}", "not configured".red());
        println!("  Set BLUESKY_USERNAME and BLUESKY_APP_PASSWORD in your .env file");
        return Ok(());
    }
    println!(
        "Bluesky account: @{} via {}",
        settings.account.username, settings.account.service
    );

    let streamer = config.streamer();
    if streamer.logged_in {
        println!("Twitch channel: {}", streamer.channel_url());
    } else {
        println!("Twitch channel: {}", "not configured".yellow());
    }

    // Connect without auto-sync so looking at the status never changes it.
    let mut probe = settings.clone();
    probe.options.automatically_sync_live_status_when_streaming = false;
    let connected = integration.configure(&probe).await;

    terminal::display_sync_state(&integration.live().state().await);
    println!(
        "Auto-sync configured: {}",
        if settings.options.automatically_sync_live_status_when_streaming {
            "yes"
        } else {
            "no"
        }
    );

    if connected {
        let status = integration.live().get_live_status().await;
        terminal::display_live_status(status.as_ref());
    }

    integration.shutdown().await;
    Ok(())
}
