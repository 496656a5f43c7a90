// Event normalization — raw feed events into flat, prefixed metadata.
//
// Every normalized event is `{kind, fields}` where `fields` is a flat map of
// prefixed keys (`blueskyUserHandle`, `blueskyPostText`, ...). The set of keys
// for a kind is fixed by `field_keys`; values the upstream doesn't carry are
// present as `None`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::bluesky::client::AccountClient;
use crate::bluesky::notifications::EventFeed;
use crate::bluesky::types::{LikeSubject, Post, Profile, RawEvent};
use crate::output::truncate_chars;
use crate::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Follow,
    Like,
    Reply,
    Repost,
    Quote,
    Mention,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Follow,
        EventKind::Like,
        EventKind::Reply,
        EventKind::Repost,
        EventKind::Quote,
        EventKind::Mention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Follow => "follow",
            EventKind::Like => "like",
            EventKind::Reply => "reply",
            EventKind::Repost => "repost",
            EventKind::Quote => "quote",
            EventKind::Mention => "mention",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            EventKind::Follow => "When someone follows you on Bluesky",
            EventKind::Like => "When someone likes one of your posts on Bluesky",
            EventKind::Reply => "When someone replies to one of your posts on Bluesky",
            EventKind::Repost => "When someone reposts one of your posts on Bluesky",
            EventKind::Quote => "When someone quotes one of your posts on Bluesky",
            EventKind::Mention => "When someone mentions you on Bluesky",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat event metadata. Keys are always present; missing values are `None`.
pub type EventFields = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub fields: EventFields,
}

/// Key prefixes for each role an entity can play in an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldPrefixes {
    pub user: String,
    pub post: String,
    pub parent_post: String,
    pub quoted_post: String,
}

impl Default for FieldPrefixes {
    fn default() -> Self {
        Self {
            user: "blueskyUser".to_string(),
            post: "blueskyPost".to_string(),
            parent_post: "blueskyParentPost".to_string(),
            quoted_post: "blueskyQuotedPost".to_string(),
        }
    }
}

const PROFILE_PROPERTIES: [&str; 6] = ["Handle", "DisplayName", "AvatarUrl", "Bio", "BannerUrl", "Id"];

const POST_PROPERTIES: [&str; 2] = ["Text", "AtUri"];

fn profile_keys(prefix: &str) -> Vec<String> {
    PROFILE_PROPERTIES
        .iter()
        .map(|p| format!("{prefix}{p}"))
        .collect()
}

fn post_keys(prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = POST_PROPERTIES
        .iter()
        .map(|p| format!("{prefix}{p}"))
        .collect();
    keys.extend(profile_keys(&format!("{prefix}Author")));
    keys
}

/// Every key a `kind` event carries, in table order.
pub fn field_keys(kind: EventKind, prefixes: &FieldPrefixes) -> Vec<String> {
    match kind {
        EventKind::Follow => profile_keys(&prefixes.user),
        EventKind::Like | EventKind::Repost => {
            let mut keys = profile_keys(&prefixes.user);
            keys.extend(post_keys(&prefixes.post));
            keys
        }
        EventKind::Reply => {
            let mut keys = post_keys(&prefixes.post);
            keys.extend(post_keys(&prefixes.parent_post));
            keys
        }
        EventKind::Quote => {
            let mut keys = post_keys(&prefixes.post);
            keys.extend(post_keys(&prefixes.quoted_post));
            keys
        }
        EventKind::Mention => post_keys(&prefixes.post),
    }
}

fn insert_profile(fields: &mut EventFields, prefix: &str, profile: Option<&Profile>) {
    let values = [
        profile.map(|p| p.handle.clone()),
        profile.and_then(|p| p.display_name.clone()),
        profile.and_then(|p| p.avatar.clone()),
        profile.and_then(|p| p.description.clone()),
        profile.and_then(|p| p.banner.clone()),
        profile.map(|p| p.did.clone()),
    ];
    for (key, value) in profile_keys(prefix).into_iter().zip(values) {
        fields.insert(key, value);
    }
}

fn insert_post(fields: &mut EventFields, prefix: &str, post: Option<&Post>) {
    fields.insert(format!("{prefix}Text"), post.map(|p| p.text.clone()));
    fields.insert(format!("{prefix}AtUri"), post.map(|p| p.uri.clone()));
    let author = post.and_then(|p| p.author.as_ref());
    insert_profile(fields, &format!("{prefix}Author"), author);
}

/// Fetch a post, treating every failure as "unavailable".
async fn fetch_post(client: &dyn AccountClient, uri: &str, role: &str) -> Option<Post> {
    match client.get_post(uri).await {
        Ok(Some(post)) => Some(post),
        Ok(None) => {
            debug!(uri = uri, role = role, "Referenced post not found");
            None
        }
        Err(e) => {
            warn!(uri = uri, role = role, error = %e, "Failed to fetch referenced post");
            None
        }
    }
}

/// Project one raw event into its normalized form.
///
/// Returns `None` only for likes whose subject is not a post. Reply parents
/// and quoted posts are fetched here; when that fetch fails the event is
/// still produced with the dependent fields set to `None`.
pub async fn normalize(
    client: &dyn AccountClient,
    prefixes: &FieldPrefixes,
    event: RawEvent,
) -> Option<NormalizedEvent> {
    let mut fields = EventFields::new();

    let kind = match event {
        RawEvent::Follow { user, .. } => {
            info!(handle = %user.handle, "Bluesky follow event");
            insert_profile(&mut fields, &prefixes.user, Some(&user));
            EventKind::Follow
        }
        RawEvent::Like { subject, user, .. } => {
            let LikeSubject::Post(post) = subject else {
                debug!(handle = %user.handle, "Ignoring like of a non-post subject");
                return None;
            };
            info!(handle = %user.handle, uri = %post.uri, "Bluesky like event");
            insert_profile(&mut fields, &prefixes.user, Some(&user));
            insert_post(&mut fields, &prefixes.post, Some(&post));
            EventKind::Like
        }
        RawEvent::Reply(post) => {
            info!(
                handle = author_handle(&post),
                text = %truncate_chars(&post.text, 80),
                "Bluesky reply event"
            );
            let parent = match &post.reply {
                Some(reply) => fetch_post(client, &reply.parent.uri, "parent").await,
                None => None,
            };
            insert_post(&mut fields, &prefixes.post, Some(&post));
            insert_post(&mut fields, &prefixes.parent_post, parent.as_ref());
            EventKind::Reply
        }
        RawEvent::Repost { post, user, .. } => {
            info!(handle = %user.handle, uri = %post.uri, "Bluesky repost event");
            insert_profile(&mut fields, &prefixes.user, Some(&user));
            insert_post(&mut fields, &prefixes.post, Some(&post));
            EventKind::Repost
        }
        RawEvent::Mention(post) => {
            info!(handle = author_handle(&post), "Bluesky mention event");
            insert_post(&mut fields, &prefixes.post, Some(&post));
            EventKind::Mention
        }
        RawEvent::Quote(post) => {
            info!(
                handle = author_handle(&post),
                text = %truncate_chars(&post.text, 80),
                "Bluesky quote event"
            );
            let quoted = match post.embed.as_ref().and_then(|e| e.record_uri()) {
                Some(uri) => fetch_post(client, uri, "quoted").await,
                None => None,
            };
            insert_post(&mut fields, &prefixes.post, Some(&post));
            insert_post(&mut fields, &prefixes.quoted_post, quoted.as_ref());
            EventKind::Quote
        }
    };

    Some(NormalizedEvent { kind, fields })
}

fn author_handle(post: &Post) -> &str {
    post.author.as_ref().map_or("unknown", |a| a.handle.as_str())
}

/// A live attachment of a feed to a sink. Closing (or dropping) it stops
/// taking new events from the feed; events already being normalized still
/// reach the sink.
pub struct Subscription {
    stop: watch::Sender<bool>,
    _listener: JoinHandle<()>,
}

impl Subscription {
    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

/// Forward every event from `feed` to `sink`, normalized.
///
/// Each raw event is handled on its own task, so a slow fetch never holds up
/// other events and events may reach the sink out of order.
pub fn subscribe(
    client: Arc<dyn AccountClient>,
    mut feed: EventFeed,
    sink: Arc<dyn EventSink>,
    prefixes: FieldPrefixes,
) -> Subscription {
    let prefixes = Arc::new(prefixes);
    let (stop, mut stop_rx) = watch::channel(false);

    let listener = tokio::spawn(async move {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                received = feed.recv() => match received {
                    Ok(raw) => {
                        let client = Arc::clone(&client);
                        let sink = Arc::clone(&sink);
                        let prefixes = Arc::clone(&prefixes);
                        in_flight.spawn(async move {
                            if let Some(event) = normalize(client.as_ref(), &prefixes, raw).await {
                                sink.emit(event);
                            }
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event listener fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "Event handler task failed");
                    }
                }
            }
        }

        drop(feed);
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "Event handler task failed");
            }
        }
        debug!("Event subscription closed");
    });

    Subscription {
        stop,
        _listener: listener,
    }
}
