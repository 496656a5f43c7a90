// Domain types shared by the client, the notification feed, the event
// normalizer and the live-status sync.
//
// These are deliberately flatter than the atrium-api lexicon types: the rest
// of the crate only needs the handful of fields it turns into event metadata
// or record references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated session against the account's PDS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub did: String,
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// A Bluesky profile as seen in notifications and post views.
///
/// Optional fields stay `None` when the upstream view does not carry them
/// (post authors, for example, never include a banner).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub banner: Option<String>,
}

/// A `{uri, cid}` pair pointing at one exact version of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Reply pointers carried by a post record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRefs {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// What a post embeds, reduced to what the normalizer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostEmbed {
    /// A record reference (quote post). `uri` is the quoted record.
    Record { uri: String },
    /// A record reference plus images or video.
    RecordWithMedia { uri: String },
    /// Images, video, external link cards.
    Other,
}

impl PostEmbed {
    /// The quoted record, if this embed references one.
    pub fn record_uri(&self) -> Option<&str> {
        match self {
            PostEmbed::Record { uri } | PostEmbed::RecordWithMedia { uri } => Some(uri),
            PostEmbed::Other => None,
        }
    }
}

/// A post, decoded from either a notification row or a post view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    pub text: String,
    pub author: Option<Profile>,
    pub reply: Option<ReplyRefs>,
    pub embed: Option<PostEmbed>,
}

impl Post {
    pub fn strong_ref(&self) -> StrongRef {
        StrongRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// The thing a like points at. Only posts produce normalized events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeSubject {
    Post(Post),
    FeedGenerator { uri: String },
    List { uri: String },
    Labeler { uri: String },
}

/// A raw interaction pulled off the account's real-time feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Follow { user: Profile, uri: String },
    Like { subject: LikeSubject, user: Profile, uri: String },
    Reply(Post),
    Repost { post: Post, user: Profile, uri: String },
    Mention(Post),
    Quote(Post),
}

impl RawEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            RawEvent::Follow { .. } => "follow",
            RawEvent::Like { .. } => "like",
            RawEvent::Reply(_) => "reply",
            RawEvent::Repost { .. } => "repost",
            RawEvent::Mention(_) => "mention",
            RawEvent::Quote(_) => "quote",
        }
    }
}

/// `{"$link": "<cid>"}` as used inside blob references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// The blob reference returned by `com.atproto.repo.uploadBlob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: CidLink,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

fn blob_type() -> String {
    "blob".to_string()
}

/// The account's live status as reported by `app.bsky.actor.getProfile`.
///
/// The server derives `isActive`, `isDisabled` and `expiresAt` from the
/// stored `app.bsky.actor.status` record; we never write those fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub status: String,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub embed: Option<serde_json::Value>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_disabled: Option<bool>,
}

impl LiveStatus {
    /// Whether the status still counts as live at `now`.
    ///
    /// Requires `isActive` and not `isDisabled`. A status without `expiresAt`
    /// never expires; one with `expiresAt` is live strictly before that instant.
    /// Missing flags read as `false`, so a bare record with no flags and no
    /// expiry is inactive.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let not_expired = match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        };

        self.is_active.unwrap_or(false) && !self.is_disabled.unwrap_or(false) && not_expired
    }
}
