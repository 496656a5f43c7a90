// Liveness signal — the "is the streamer live?" seam and the streamer account.

use async_trait::async_trait;

/// Answers whether the streamer is broadcasting right now.
///
/// Polled, never pushed. Implementations report failures as "not live".
#[async_trait]
pub trait LiveSignalSource: Send + Sync {
    async fn check_is_live(&self) -> bool;
}

/// Stand-in when no streaming platform is configured.
#[derive(Debug, Default)]
pub struct NeverLive;

#[async_trait]
impl LiveSignalSource for NeverLive {
    async fn check_is_live(&self) -> bool {
        false
    }
}

/// The streamer account on the streaming platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamerAccount {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Whether the platform credentials are in place.
    pub logged_in: bool,
}

impl StreamerAccount {
    /// Public channel page.
    pub fn channel_url(&self) -> String {
        format!("https://www.twitch.tv/{}", self.username)
    }

    /// Name to show in the live card.
    pub fn name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ if !self.username.is_empty() => &self.username,
            _ => "Streamer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_falls_back() {
        let mut account = StreamerAccount {
            username: "streamer".to_string(),
            ..StreamerAccount::default()
        };
        assert_eq!(account.name(), "streamer");
        account.display_name = Some("Streamer Person".to_string());
        assert_eq!(account.name(), "Streamer Person");
        assert_eq!(StreamerAccount::default().name(), "Streamer");
        assert_eq!(account.channel_url(), "https://www.twitch.tv/streamer");
    }
}
