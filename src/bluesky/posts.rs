// Post decoding — turn post views and raw post records into domain `Post`s.
//
// Post records arrive as untyped IPLD/JSON values, both in post views from
// `app.bsky.feed.getPosts` and in notification rows. We decode them into the
// typed atrium-api post record to read the text, reply pointers and embed.

use atrium_api::app::bsky::feed::post::{RecordData, RecordEmbedRefs};
use atrium_api::types::string::Cid;
use atrium_api::types::Union;
use serde::Deserialize;
use tracing::debug;

use super::types::{Post, PostEmbed, Profile, ReplyRefs, StrongRef};

/// Response from `app.bsky.feed.getPosts`.
#[derive(Debug, Deserialize)]
pub struct GetPostsResponse {
    pub posts: Vec<PostView>,
}

/// The subset of `app.bsky.feed.defs#postView` we read.
#[derive(Debug, Deserialize)]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: AuthorView,
    pub record: serde_json::Value,
}

/// `app.bsky.actor.defs#profileViewBasic`, plus the optional fields of the
/// fuller profile views when a server happens to include them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorView {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub banner: Option<String>,
}

impl From<AuthorView> for Profile {
    fn from(author: AuthorView) -> Self {
        Profile {
            did: author.did,
            handle: author.handle,
            display_name: author.display_name,
            avatar: author.avatar,
            description: author.description,
            banner: author.banner,
        }
    }
}

/// The parts of a post record the rest of the crate needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordParts {
    pub text: String,
    pub reply: Option<ReplyRefs>,
    pub embed: Option<PostEmbed>,
}

/// Render a lexicon CID as its string form.
pub fn cid_string(cid: &Cid) -> String {
    serde_json::to_value(cid)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn strong_ref(main: &atrium_api::com::atproto::repo::strong_ref::Main) -> StrongRef {
    StrongRef {
        uri: main.uri.clone(),
        cid: cid_string(&main.cid),
    }
}

/// Pull text, reply pointers and embed out of a typed post record.
pub fn record_parts(record: &RecordData) -> RecordParts {
    let reply = record.reply.as_ref().map(|reply| ReplyRefs {
        root: strong_ref(&reply.root),
        parent: strong_ref(&reply.parent),
    });

    let embed = record.embed.as_ref().map(|embed| match embed {
        Union::Refs(RecordEmbedRefs::AppBskyEmbedRecordMain(quote)) => PostEmbed::Record {
            uri: quote.record.uri.clone(),
        },
        Union::Refs(RecordEmbedRefs::AppBskyEmbedRecordWithMediaMain(quote)) => {
            PostEmbed::RecordWithMedia {
                uri: quote.record.record.uri.clone(),
            }
        }
        _ => PostEmbed::Other,
    });

    RecordParts {
        text: record.text.clone(),
        reply,
        embed,
    }
}

/// Decode a post record from JSON.
///
/// Falls back to just the `text` field when the record doesn't fit the
/// lexicon (unknown embed shapes, malformed language tags and so on) so a
/// single odd post never drops an event.
pub fn decode_record(value: &serde_json::Value) -> RecordParts {
    match serde_json::from_value::<RecordData>(value.clone()) {
        Ok(record) => record_parts(&record),
        Err(e) => {
            debug!(error = %e, "Post record did not decode, using text only");
            RecordParts {
                text: value
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                ..RecordParts::default()
            }
        }
    }
}

/// Build a domain post from a `getPosts` view.
pub fn post_from_view(view: PostView) -> Post {
    let parts = decode_record(&view.record);
    Post {
        uri: view.uri,
        cid: view.cid,
        text: parts.text,
        author: Some(view.author.into()),
        reply: parts.reply,
        embed: parts.embed,
    }
}
