use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use skybridge::bluesky::client::AtpClientFactory;
use skybridge::bluesky::posting::{ExternalLink, ImageAttachment, PostOptions, PostPayload};
use skybridge::bluesky::records::ReplyGate;
use skybridge::config::Config;
use skybridge::events::FieldPrefixes;
use skybridge::integration::Integration;
use skybridge::live::signal::{LiveSignalSource, NeverLive};
use skybridge::live::sync::LiveStatusSync;
use skybridge::live::twitch::TwitchLiveSource;
use skybridge::output::terminal;
use skybridge::sink::JsonLinesSink;
use skybridge::{actions, status};

/// Skybridge: Bluesky event bridge and live-status sync for streamers.
///
/// Streams follows, likes, replies, reposts, quotes and mentions as JSON
/// lines, and keeps your Bluesky live status in step with your Twitch stream.
#[derive(Parser)]
#[command(name = "skybridge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream events to stdout until Ctrl-C (SIGHUP reloads settings)
    Run,

    /// Post to Bluesky
    Post {
        /// Post text. Markdown links like [label](https://...) become links.
        text: String,

        /// Reply to this post (AT URI) instead of posting at the top level
        #[arg(long)]
        reply_to: Option<String>,

        /// Attach a link card for this URL
        #[arg(long)]
        link: Option<String>,

        /// Link card title
        #[arg(long, default_value = "")]
        link_title: String,

        /// Link card description
        #[arg(long, default_value = "")]
        link_description: String,

        /// Link card thumbnail image URL
        #[arg(long)]
        link_thumb: Option<String>,

        /// Attach an image by URL (up to 4, repeatable)
        #[arg(long = "image")]
        images: Vec<String>,

        /// Alt text for the images, in order (repeatable)
        #[arg(long = "alt")]
        alts: Vec<String>,

        /// Who may reply: everyone, nobody, or any of mentioned,following,followers
        #[arg(long, default_value = "everyone")]
        reply_gate: String,

        /// Only turn markdown links into facets; skip bare links, tags and mentions
        #[arg(long)]
        no_facets: bool,

        /// Split text over 300 characters into a thread
        #[arg(long)]
        split: bool,
    },

    /// Like a post by AT URI
    Like {
        uri: String,
    },

    /// Delete one of your own posts by AT URI
    Delete {
        uri: String,
    },

    /// Set your live status on Bluesky
    SetLive {
        /// Minutes until the status expires (default: 180, max: 240)
        #[arg(long)]
        minutes: Option<u32>,
    },

    /// Clear your live status on Bluesky
    ClearLive,

    /// Show configuration, connection and live status
    Status,

    /// List the event kinds and the metadata fields each one carries
    Fields,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Structured logging goes to stderr so stdout stays a clean event stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skybridge=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = Config::load()?;
            config.require_bluesky()?;
            let settings = config.settings()?;
            if settings.options.automatically_sync_live_status_when_streaming {
                config.require_twitch()?;
            }

            let integration = build_integration(&config)?;
            if !integration.configure(&settings).await {
                warn!("Not connected to Bluesky; fix the settings and send SIGHUP to retry");
            }

            wait_for_shutdown(&config, &integration).await;
            integration.shutdown().await;
        }

        Commands::Post {
            text,
            reply_to,
            link,
            link_title,
            link_description,
            link_thumb,
            images,
            alts,
            reply_gate,
            no_facets,
            split,
        } => {
            let payload = PostPayload {
                text,
                external_link: link.map(|uri| ExternalLink {
                    uri,
                    title: link_title,
                    description: link_description,
                    thumb_url: link_thumb,
                }),
                images: images
                    .into_iter()
                    .enumerate()
                    .map(|(i, url)| ImageAttachment {
                        url,
                        alt: alts.get(i).cloned().unwrap_or_default(),
                    })
                    .collect(),
                reply_gate: ReplyGate::parse(&reply_gate)?,
            };
            let opts = PostOptions {
                resolve_facets: !no_facets,
                split_long_post: split,
            };

            let integration = connect_once().await?;
            let ok =
                actions::post_to_bluesky(&integration, &payload, &opts, reply_to.as_deref()).await;
            integration.shutdown().await;
            report(ok, "Posted to Bluesky")?;
        }

        Commands::Like { uri } => {
            let integration = connect_once().await?;
            let ok = actions::like_post(&integration, &uri).await;
            integration.shutdown().await;
            report(ok, "Liked post")?;
        }

        Commands::Delete { uri } => {
            let integration = connect_once().await?;
            let ok = actions::delete_post(&integration, &uri).await;
            integration.shutdown().await;
            report(ok, "Deleted post")?;
        }

        Commands::SetLive { minutes } => {
            let integration = connect_once().await?;
            let ok = actions::set_live_status(&integration, minutes).await;
            integration.shutdown().await;
            report(ok, "Live status set")?;
        }

        Commands::ClearLive => {
            let integration = connect_once().await?;
            let ok = actions::clear_live_status(&integration).await;
            integration.shutdown().await;
            report(ok, "Live status cleared")?;
        }

        Commands::Status => {
            let config = Config::load()?;
            let integration = build_integration(&config)?;
            status::show(&config, &integration).await?;
        }

        Commands::Fields => {
            terminal::display_field_table(&FieldPrefixes::default());
        }
    }

    Ok(())
}

/// Wire the integration from config: real client factory, Twitch signal when
/// configured, JSON lines on stdout.
fn build_integration(config: &Config) -> Result<Arc<Integration>> {
    let signal: Arc<dyn LiveSignalSource> = if config.has_twitch() {
        Arc::new(TwitchLiveSource::new(
            &config.twitch_client_id,
            &config.twitch_access_token,
            &config.twitch_username,
        )?)
    } else {
        Arc::new(NeverLive)
    };

    let live = Arc::new(LiveStatusSync::new(signal, config.streamer()));
    let factory = Arc::new(AtpClientFactory {
        feed_interval: config.feed_poll_interval,
    });

    Ok(Arc::new(Integration::new(
        factory,
        Arc::new(JsonLinesSink),
        live,
        FieldPrefixes::default(),
    )))
}

/// Log in for a single command, with auto-sync off so the command never
/// touches the live status on its own.
async fn connect_once() -> Result<Arc<Integration>> {
    let config = Config::load()?;
    config.require_bluesky()?;

    let mut settings = config.settings()?;
    settings.options.automatically_sync_live_status_when_streaming = false;

    let integration = build_integration(&config)?;
    if !integration.configure(&settings).await {
        anyhow::bail!("Could not log in to Bluesky as @{}", settings.account.username);
    }
    Ok(integration)
}

fn report(ok: bool, what: &str) -> Result<()> {
    if ok {
        terminal::display_succeeded(what);
        Ok(())
    } else {
        terminal::display_failed(what);
        anyhow::bail!("{what}: failed (see log for details)")
    }
}

/// Block until Ctrl-C. On Unix, SIGHUP re-reads the settings and
/// reconfigures the integration.
async fn wait_for_shutdown(config: &Config, integration: &Integration) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGHUP, settings reload disabled");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading settings");
                    match config.settings() {
                        Ok(settings) => {
                            integration.configure(&settings).await;
                        }
                        Err(e) => warn!(error = %e, "Failed to reload settings, keeping current ones"),
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = config;
        let _ = integration;
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutting down");
}
