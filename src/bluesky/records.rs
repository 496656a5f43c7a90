// Record builders — the JSON bodies we write to the account's repo.
//
// Everything here is pure: no network, no clock except where a `now` is
// passed in. Collections and `$type` values follow the app.bsky lexicons.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::types::{BlobRef, StrongRef};
use crate::facets::{FacetFeature, RichFacet};

pub const POST_COLLECTION: &str = "app.bsky.feed.post";
pub const LIKE_COLLECTION: &str = "app.bsky.feed.like";
pub const THREADGATE_COLLECTION: &str = "app.bsky.feed.threadgate";
pub const STATUS_COLLECTION: &str = "app.bsky.actor.status";

/// The single well-known record key for the account's status record.
pub const STATUS_RKEY: &str = "self";

/// The status value for "currently streaming".
pub const LIVE_STATUS: &str = "app.bsky.actor.status#live";

/// Longest live status the platform accepts, in minutes.
pub const MAX_STATUS_DURATION_MINUTES: u32 = 240;

/// A parsed `at://authority/collection/rkey` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl AtUri {
    /// Parse a record URI. Collection-only or authority-only URIs are rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("at://")
            .with_context(|| format!("Not an AT URI: {uri}"))?;

        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(collection), Some(rkey))
                if !authority.is_empty()
                    && !collection.is_empty()
                    && !rkey.is_empty()
                    && !rkey.contains('/') =>
            {
                Ok(Self {
                    authority: authority.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            _ => anyhow::bail!("AT URI does not name a record: {uri}"),
        }
    }

    pub fn format(authority: &str, collection: &str, rkey: &str) -> String {
        format!("at://{authority}/{collection}/{rkey}")
    }
}

/// URI of the account's status record.
pub fn status_uri(did: &str) -> String {
    AtUri::format(did, STATUS_COLLECTION, STATUS_RKEY)
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A link card: `app.bsky.embed.external`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCard {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb: Option<BlobRef>,
}

impl ExternalCard {
    pub fn to_embed(&self) -> Value {
        let mut external = json!({
            "$type": "app.bsky.embed.external#external",
            "uri": self.uri,
            "title": self.title,
            "description": self.description,
        });
        if let Some(thumb) = &self.thumb {
            external["thumb"] = json!(thumb);
        }
        json!({ "$type": "app.bsky.embed.external", "external": external })
    }
}

/// An uploaded image with its alt text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub blob: BlobRef,
    pub alt: String,
}

pub fn images_embed(images: &[EmbeddedImage]) -> Value {
    let images: Vec<Value> = images
        .iter()
        .map(|image| json!({ "image": image.blob, "alt": image.alt }))
        .collect();
    json!({ "$type": "app.bsky.embed.images", "images": images })
}

fn facet_json(facet: &RichFacet) -> Value {
    let feature = match &facet.feature {
        FacetFeature::Link { uri } => json!({ "$type": "app.bsky.richtext.facet#link", "uri": uri }),
        FacetFeature::Mention { did } => {
            json!({ "$type": "app.bsky.richtext.facet#mention", "did": did })
        }
        FacetFeature::Tag { tag } => json!({ "$type": "app.bsky.richtext.facet#tag", "tag": tag }),
    };
    json!({
        "index": { "byteStart": facet.byte_start, "byteEnd": facet.byte_end },
        "features": [feature],
    })
}

/// An `app.bsky.feed.post` record.
pub fn post_record(
    text: &str,
    facets: &[RichFacet],
    embed: Option<Value>,
    reply: Option<(&StrongRef, &StrongRef)>,
    now: DateTime<Utc>,
) -> Value {
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": text,
        "createdAt": timestamp(now),
    });
    if !facets.is_empty() {
        record["facets"] = Value::Array(facets.iter().map(facet_json).collect());
    }
    if let Some(embed) = embed {
        record["embed"] = embed;
    }
    if let Some((root, parent)) = reply {
        record["reply"] = json!({ "root": root, "parent": parent });
    }
    record
}

/// An `app.bsky.feed.like` record.
pub fn like_record(subject: &StrongRef, now: DateTime<Utc>) -> Value {
    json!({
        "$type": LIKE_COLLECTION,
        "subject": subject,
        "createdAt": timestamp(now),
    })
}

/// Who may reply to a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyGate {
    pub mentioned: bool,
    pub following: bool,
    pub followers: bool,
    /// When false, anyone may reply and no threadgate is written.
    pub restricted: bool,
}

impl ReplyGate {
    pub const EVERYONE: ReplyGate = ReplyGate {
        mentioned: false,
        following: false,
        followers: false,
        restricted: false,
    };

    pub const NOBODY: ReplyGate = ReplyGate {
        mentioned: false,
        following: false,
        followers: false,
        restricted: true,
    };

    /// Parse a comma-separated mode list: `everyone`, `nobody`, or any of
    /// `mentioned`, `following`, `followers`.
    pub fn parse(mode: &str) -> Result<Self> {
        let mut gate = ReplyGate::NOBODY;
        for part in mode.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "everyone" | "everybody" => return Ok(ReplyGate::EVERYONE),
                "nobody" => {}
                "mentioned" => gate.mentioned = true,
                "following" => gate.following = true,
                "followers" => gate.followers = true,
                other => anyhow::bail!("Unknown reply gate mode: {other}"),
            }
        }
        Ok(gate)
    }
}

/// An `app.bsky.feed.threadgate` record for `post_uri`, or `None` if the gate
/// lets everyone reply.
pub fn threadgate_record(post_uri: &str, gate: ReplyGate, now: DateTime<Utc>) -> Option<Value> {
    if !gate.restricted {
        return None;
    }

    let mut allow = Vec::new();
    if gate.mentioned {
        allow.push(json!({ "$type": "app.bsky.feed.threadgate#mentionRule" }));
    }
    if gate.following {
        allow.push(json!({ "$type": "app.bsky.feed.threadgate#followingRule" }));
    }
    if gate.followers {
        allow.push(json!({ "$type": "app.bsky.feed.threadgate#followerRule" }));
    }

    Some(json!({
        "$type": THREADGATE_COLLECTION,
        "post": post_uri,
        "allow": allow,
        "createdAt": timestamp(now),
    }))
}

/// The full `app.bsky.actor.status` record. Always written whole.
pub fn live_status_record(
    duration_minutes: u32,
    embed: Option<&ExternalCard>,
    now: DateTime<Utc>,
) -> Value {
    let mut record = json!({
        "$type": STATUS_COLLECTION,
        "status": LIVE_STATUS,
        "durationMinutes": duration_minutes,
        "createdAt": timestamp(now),
    });
    if let Some(card) = embed {
        record["embed"] = card.to_embed();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluesky::types::CidLink;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_at_uri() {
        let uri = AtUri::parse("at://did:plc:abc/app.bsky.feed.post/3kabc").unwrap();
        assert_eq!(uri.authority, "did:plc:abc");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3kabc");
    }

    #[test]
    fn test_parse_rejects_non_record_uris() {
        assert!(AtUri::parse("https://bsky.app/profile/x").is_err());
        assert!(AtUri::parse("at://did:plc:abc").is_err());
        assert!(AtUri::parse("at://did:plc:abc/app.bsky.feed.post").is_err());
        assert!(AtUri::parse("at://did:plc:abc/app.bsky.feed.post/3kabc/extra").is_err());
        assert!(AtUri::parse("at://did:plc:abc/app.bsky.feed.post/3kabc/").is_err());
    }

    #[test]
    fn test_status_uri() {
        assert_eq!(
            status_uri("did:plc:me"),
            "at://did:plc:me/app.bsky.actor.status/self"
        );
    }

    #[test]
    fn test_post_record_with_facets_and_reply() {
        let facets = vec![RichFacet {
            byte_start: 0,
            byte_end: 2,
            feature: FacetFeature::Link {
                uri: "http://example.com".to_string(),
            },
        }];
        let root = StrongRef {
            uri: "at://did:plc:a/app.bsky.feed.post/1".to_string(),
            cid: "cid1".to_string(),
        };
        let record = post_record("Go", &facets, None, Some((&root, &root)), now());

        assert_eq!(record["text"], "Go");
        assert_eq!(record["createdAt"], "2025-06-01T12:00:00.000Z");
        assert_eq!(record["facets"][0]["index"]["byteEnd"], 2);
        assert_eq!(
            record["facets"][0]["features"][0]["$type"],
            "app.bsky.richtext.facet#link"
        );
        assert_eq!(record["reply"]["parent"]["cid"], "cid1");
        assert!(record.get("embed").is_none());
    }

    #[test]
    fn test_reply_gate_parse() {
        assert_eq!(ReplyGate::parse("everyone").unwrap(), ReplyGate::EVERYONE);
        assert_eq!(ReplyGate::parse("nobody").unwrap(), ReplyGate::NOBODY);

        let gate = ReplyGate::parse("mentioned, followers").unwrap();
        assert!(gate.restricted && gate.mentioned && gate.followers && !gate.following);

        assert!(ReplyGate::parse("friends").is_err());
    }

    #[test]
    fn test_threadgate_record_rules() {
        assert!(threadgate_record("at://x/app.bsky.feed.post/1", ReplyGate::EVERYONE, now()).is_none());

        let nobody = threadgate_record("at://x/app.bsky.feed.post/1", ReplyGate::NOBODY, now()).unwrap();
        assert_eq!(nobody["allow"].as_array().unwrap().len(), 0);

        let gate = ReplyGate::parse("following").unwrap();
        let record = threadgate_record("at://x/app.bsky.feed.post/1", gate, now()).unwrap();
        assert_eq!(
            record["allow"][0]["$type"],
            "app.bsky.feed.threadgate#followingRule"
        );
        assert_eq!(record["post"], "at://x/app.bsky.feed.post/1");
    }

    #[test]
    fn test_live_status_record_without_embed() {
        let record = live_status_record(120, None, now());
        assert_eq!(record["$type"], "app.bsky.actor.status");
        assert_eq!(record["status"], LIVE_STATUS);
        assert_eq!(record["durationMinutes"], 120);
        assert!(record.get("embed").is_none());
    }

    #[test]
    fn test_live_status_record_with_thumbnail_embed() {
        let card = ExternalCard {
            uri: "https://www.twitch.tv/streamer".to_string(),
            title: "Twitch".to_string(),
            description: "Streamer is live on Twitch!".to_string(),
            thumb: Some(BlobRef {
                kind: "blob".to_string(),
                reference: CidLink {
                    link: "bafkrei".to_string(),
                },
                mime_type: "image/png".to_string(),
                size: 10,
            }),
        };
        let record = live_status_record(240, Some(&card), now());
        let external = &record["embed"]["external"];
        assert_eq!(record["embed"]["$type"], "app.bsky.embed.external");
        assert_eq!(external["uri"], "https://www.twitch.tv/streamer");
        assert_eq!(external["thumb"]["ref"]["$link"], "bafkrei");
        assert_eq!(external["thumb"]["mimeType"], "image/png");
    }
}
