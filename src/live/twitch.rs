// Twitch liveness — Helix `GET /helix/streams?user_login=`.
//
// The streams endpoint returns one entry per live channel and an empty list
// otherwise, so "live" is just "the list is non-empty".

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::signal::LiveSignalSource;

pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    #[serde(rename = "type", default)]
    kind: String,
}

pub struct TwitchLiveSource {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    access_token: String,
    user_login: String,
}

impl TwitchLiveSource {
    pub fn new(client_id: &str, access_token: &str, user_login: &str) -> Result<Self> {
        Self::with_base_url(DEFAULT_HELIX_URL, client_id, access_token, user_login)
    }

    pub fn with_base_url(
        base_url: &str,
        client_id: &str,
        access_token: &str,
        user_login: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("skybridge/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            access_token: access_token.to_string(),
            user_login: user_login.to_lowercase(),
        })
    }

    async fn fetch_is_live(&self) -> Result<bool> {
        let url = format!("{}/streams", self.base_url);
        let response: StreamsResponse = self
            .http
            .get(&url)
            .query(&[("user_login", self.user_login.as_str())])
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Helix streams request failed")?
            .error_for_status()
            .context("Helix streams returned an error")?
            .json()
            .await
            .context("Failed to parse Helix streams response")?;

        Ok(is_live(&response))
    }
}

fn is_live(response: &StreamsResponse) -> bool {
    response
        .data
        .iter()
        .any(|s| s.kind.is_empty() || s.kind == "live")
}

#[async_trait]
impl LiveSignalSource for TwitchLiveSource {
    async fn check_is_live(&self) -> bool {
        match self.fetch_is_live().await {
            Ok(live) => {
                debug!(user = %self.user_login, live = live, "Twitch live check");
                live
            }
            Err(e) => {
                warn!(user = %self.user_login, error = %e, "Twitch live check failed, treating as offline");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_response_live() {
        let json = r#"{"data":[{"id":"1","user_login":"streamer","type":"live","title":"hi"}],"pagination":{}}"#;
        let response: StreamsResponse = serde_json::from_str(json).unwrap();
        assert!(is_live(&response));
    }

    #[test]
    fn test_streams_response_offline() {
        let response: StreamsResponse = serde_json::from_str(r#"{"data":[],"pagination":{}}"#).unwrap();
        assert!(!is_live(&response));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_offline() {
        let source =
            TwitchLiveSource::with_base_url("http://127.0.0.1:9", "id", "token", "Streamer").unwrap();
        assert!(!source.check_is_live().await);
        assert_eq!(source.user_login, "streamer");
    }
}
