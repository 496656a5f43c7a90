// Configuration — environment variables and the JSON settings file.
//
// Secrets only ever come from the environment (or the settings file it
// points at). Nothing is validated at load time; callers run the
// `require_*` checks before the operations that need them.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bluesky::client::{DEFAULT_FEED_POLL_INTERVAL, DEFAULT_SERVICE_URL};
use crate::live::signal::StreamerAccount;

/// Bluesky account settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    pub username: String,
    pub app_password: String,
    pub service: String,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            app_password: String::new(),
            service: DEFAULT_SERVICE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrationOptions {
    pub automatically_sync_live_status_when_streaming: bool,
}

/// The integration's user settings. Changing them re-initializes the
/// integration from scratch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    pub account: AccountSettings,
    pub options: IntegrationOptions,
}

impl IntegrationSettings {
    /// Read settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    /// True when username, password and service are all present.
    pub fn has_credentials(&self) -> bool {
        !self.account.username.trim().is_empty()
            && !self.account.app_password.is_empty()
            && !self.account.service.trim().is_empty()
    }
}

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded automatically
/// at startup via dotenvy.
pub struct Config {
    pub bluesky_username: String,
    pub bluesky_app_password: String,
    /// PDS or entryway for password logins (defaults to https://bsky.social).
    pub bluesky_service: String,
    pub sync_live_status: bool,
    /// Optional JSON settings file; when set it replaces the env-derived settings.
    pub settings_path: Option<PathBuf>,
    pub twitch_client_id: String,
    pub twitch_access_token: String,
    pub twitch_username: String,
    pub twitch_display_name: Option<String>,
    pub twitch_avatar_url: Option<String>,
    pub feed_poll_interval: Duration,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from environment variables. Nothing is required at
    /// load time; use the `require_*` checks before operations that need it.
    pub fn load() -> Result<Self> {
        let feed_poll_interval = match non_empty("FEED_POLL_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .trim()
                    .parse()
                    .with_context(|| format!("FEED_POLL_SECS must be a number of seconds, got {secs:?}"))?;
                Duration::from_secs(secs.max(1))
            }
            None => DEFAULT_FEED_POLL_INTERVAL,
        };

        Ok(Self {
            bluesky_username: env::var("BLUESKY_USERNAME").unwrap_or_default(),
            bluesky_app_password: env::var("BLUESKY_APP_PASSWORD").unwrap_or_default(),
            bluesky_service: non_empty("BLUESKY_SERVICE")
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            sync_live_status: non_empty("SYNC_LIVE_STATUS").is_some_and(|v| parse_bool(&v)),
            settings_path: non_empty("SKYBRIDGE_SETTINGS").map(PathBuf::from),
            twitch_client_id: env::var("TWITCH_CLIENT_ID").unwrap_or_default(),
            twitch_access_token: env::var("TWITCH_ACCESS_TOKEN").unwrap_or_default(),
            twitch_username: env::var("TWITCH_USERNAME").unwrap_or_default(),
            twitch_display_name: non_empty("TWITCH_DISPLAY_NAME"),
            twitch_avatar_url: non_empty("TWITCH_AVATAR_URL"),
            feed_poll_interval,
        })
    }

    /// The integration settings: the settings file when configured, else the
    /// environment. Re-read on every call so a reload picks up edits.
    pub fn settings(&self) -> Result<IntegrationSettings> {
        if let Some(path) = &self.settings_path {
            return IntegrationSettings::from_file(path);
        }

        Ok(IntegrationSettings {
            account: AccountSettings {
                username: self.bluesky_username.clone(),
                app_password: self.bluesky_app_password.clone(),
                service: self.bluesky_service.clone(),
            },
            options: IntegrationOptions {
                automatically_sync_live_status_when_streaming: self.sync_live_status,
            },
        })
    }

    /// The streamer account. Logged in iff Helix credentials are present.
    pub fn streamer(&self) -> StreamerAccount {
        StreamerAccount {
            username: self.twitch_username.clone(),
            display_name: self.twitch_display_name.clone(),
            avatar_url: self.twitch_avatar_url.clone(),
            logged_in: self.has_twitch(),
        }
    }

    pub fn has_twitch(&self) -> bool {
        !self.twitch_client_id.is_empty()
            && !self.twitch_access_token.is_empty()
            && !self.twitch_username.is_empty()
    }

    /// Check that Bluesky credentials are configured.
    /// Call this before any operation that logs in.
    pub fn require_bluesky(&self) -> Result<()> {
        let settings = self.settings()?;
        if !settings.has_credentials() {
            anyhow::bail!(
                "Bluesky account login is missing. Set BLUESKY_USERNAME and \
                 BLUESKY_APP_PASSWORD in your .env file (or provide them in SKYBRIDGE_SETTINGS).\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Check that Twitch credentials are configured.
    /// Call this before checking whether the streamer is live.
    pub fn require_twitch(&self) -> Result<()> {
        if !self.has_twitch() {
            anyhow::bail!(
                "TWITCH_CLIENT_ID, TWITCH_ACCESS_TOKEN and TWITCH_USERNAME must all be set \
                 to sync live status.\nSee .env.example for the required variables."
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_json_shape() {
        let json = r#"{
            "account": {"username": "me.bsky.social", "appPassword": "abcd-efgh"},
            "options": {"automaticallySyncLiveStatusWhenStreaming": true}
        }"#;
        let settings: IntegrationSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.account.username, "me.bsky.social");
        assert_eq!(settings.account.app_password, "abcd-efgh");
        assert_eq!(settings.account.service, DEFAULT_SERVICE_URL);
        assert!(settings.options.automatically_sync_live_status_when_streaming);
        assert!(settings.has_credentials());
    }

    #[test]
    fn test_missing_options_default_off() {
        let settings: IntegrationSettings =
            serde_json::from_str(r#"{"account": {"username": "me"}}"#).unwrap();
        assert!(!settings.options.automatically_sync_live_status_when_streaming);
        assert!(!settings.has_credentials());
    }

    #[test]
    fn test_env_example_lists_required_variables() {
        let example = include_str!("../.env.example");
        for var in [
            "BLUESKY_USERNAME",
            "BLUESKY_APP_PASSWORD",
            "TWITCH_CLIENT_ID",
            "TWITCH_ACCESS_TOKEN",
            "TWITCH_USERNAME",
        ] {
            assert!(example.contains(var), "{var} missing from .env.example");
        }
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" 1 "));
        assert!(parse_bool("Yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
