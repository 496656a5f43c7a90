// Notification feed — poll the account's notifications into raw events.
//
// Bluesky has no push channel for "someone followed / liked / replied", so
// the feed polls `app.bsky.notification.listNotifications`. The first poll
// only records a baseline; later polls turn rows newer than the baseline into
// `RawEvent`s (oldest first) on a broadcast channel and mark them seen.
// A poll follows the cursor back through older pages until it reaches the
// baseline, so bursts larger than one page are not lost.

use std::time::Duration;

use anyhow::Result;
use atrium_api::app::bsky::actor::defs::ProfileView;
use atrium_api::app::bsky::notification::list_notifications;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::{AccountClient, AtpClient};
use super::posts::{cid_string, decode_record};
use super::records::{AtUri, POST_COLLECTION};
use super::types::{LikeSubject, Post, Profile, RawEvent};

/// Rows requested per page.
const PAGE_SIZE: &str = "50";

/// Upper bound on pages fetched in a single poll.
const MAX_PAGES: usize = 20;

/// Buffered events per subscriber before it starts lagging.
const FEED_CAPACITY: usize = 256;

/// A live stream of raw interactions for one account.
///
/// Dropping (or closing) the feed stops its poller.
pub struct EventFeed {
    receiver: broadcast::Receiver<RawEvent>,
    poller: Option<JoinHandle<()>>,
}

impl EventFeed {
    /// A feed driven by a background poller task.
    pub fn new(receiver: broadcast::Receiver<RawEvent>, poller: JoinHandle<()>) -> Self {
        Self {
            receiver,
            poller: Some(poller),
        }
    }

    /// A feed fed directly by whoever owns the sender.
    pub fn from_receiver(receiver: broadcast::Receiver<RawEvent>) -> Self {
        Self {
            receiver,
            poller: None,
        }
    }

    /// Next event. `Lagged` means events were dropped; `Closed` that the feed ended.
    pub async fn recv(&mut self) -> Result<RawEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Stop the poller and release the channel.
    pub fn close(self) {}
}

impl Drop for EventFeed {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

/// Spawn the notification poller for `client`.
pub fn spawn_feed(client: AtpClient, interval: Duration) -> EventFeed {
    let (tx, rx) = broadcast::channel(FEED_CAPACITY);
    let poller = tokio::spawn(run_poller(client, tx, interval));
    EventFeed::new(rx, poller)
}

async fn run_poller(client: AtpClient, tx: broadcast::Sender<RawEvent>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut baseline: Option<DateTime<Utc>> = None;

    info!(interval_secs = interval.as_secs(), "Notification feed started");

    loop {
        ticker.tick().await;
        if tx.receiver_count() == 0 {
            debug!("Notification feed has no subscribers, stopping");
            break;
        }
        if let Err(e) = poll_once(&client, &tx, &mut baseline).await {
            warn!(error = %e, "Notification poll failed");
        }
    }
}

async fn poll_once(
    client: &AtpClient,
    tx: &broadcast::Sender<RawEvent>,
    baseline: &mut Option<DateTime<Utc>>,
) -> Result<()> {
    let rows = fetch_since(client, *baseline).await?;

    let Some(since) = *baseline else {
        let newest = rows.iter().map(indexed_at).max();
        *baseline = Some(newest.unwrap_or(DateTime::<Utc>::MIN_UTC));
        debug!(rows = rows.len(), "Notification baseline established");
        return Ok(());
    };

    let fresh = newer_than(&rows, since);
    let Some(newest) = fresh.last().map(|n| indexed_at(n)) else {
        return Ok(());
    };

    debug!(count = fresh.len(), "New notifications");

    for notification in fresh {
        let Some(pending) = classify(notification) else {
            continue;
        };
        if let Some(event) = resolve(client, pending).await {
            debug!(kind = event.name(), "Feed event");
            let _ = tx.send(event);
        }
    }

    *baseline = Some(newest);
    let seen_at = newest.to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Err(e) = client.update_seen(&seen_at).await {
        warn!(error = %e, "Failed to mark notifications seen");
    }
    Ok(())
}

/// Fetch notification pages, newest first, until a page reaches `since`.
/// Without a baseline only the newest page is fetched.
async fn fetch_since(
    client: &AtpClient,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<list_notifications::Notification>> {
    let mut rows = Vec::new();
    let mut cursor: Option<String> = None;

    for page in 1..=MAX_PAGES {
        let mut params = vec![("limit", PAGE_SIZE)];
        if let Some(c) = cursor.as_deref() {
            params.push(("cursor", c));
        }

        let output: list_notifications::Output = client
            .xrpc_get("app.bsky.notification.listNotifications", &params)
            .await?;
        let list_notifications::OutputData {
            notifications,
            cursor: next,
            ..
        } = output.data;

        let more = since
            .is_some_and(|since| needs_next_page(&notifications, next.as_deref(), since));
        rows.extend(notifications);
        if !more {
            return Ok(rows);
        }
        if page == MAX_PAGES {
            warn!(
                pages = MAX_PAGES,
                "Notification backlog exceeds page limit, older rows skipped"
            );
        }
        cursor = next;
    }

    Ok(rows)
}

/// Whether rows older than `page` may still be newer than `since`.
pub fn needs_next_page(
    page: &[list_notifications::Notification],
    cursor: Option<&str>,
    since: DateTime<Utc>,
) -> bool {
    if cursor.is_none() {
        return false;
    }
    page.iter()
        .map(indexed_at)
        .min()
        .is_some_and(|oldest| oldest > since)
}

fn indexed_at(notification: &list_notifications::Notification) -> DateTime<Utc> {
    notification.indexed_at.as_ref().with_timezone(&Utc)
}

/// Rows indexed strictly after `since`, oldest first.
pub fn newer_than(
    notifications: &[list_notifications::Notification],
    since: DateTime<Utc>,
) -> Vec<&list_notifications::Notification> {
    let mut fresh: Vec<_> = notifications
        .iter()
        .filter(|n| indexed_at(n) > since)
        .collect();
    fresh.sort_by_key(|n| indexed_at(n));
    fresh
}

/// A notification classified by reason, before any subject fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    Ready(RawEvent),
    Like {
        subject_uri: String,
        user: Profile,
        uri: String,
    },
    Repost {
        subject_uri: String,
        user: Profile,
        uri: String,
    },
}

/// Map a notification row to the event it describes. Unknown reasons, and
/// likes or reposts without a subject, yield `None`.
pub fn classify(notification: &list_notifications::Notification) -> Option<Pending> {
    let user = profile_from_author(&notification.author);
    let uri = notification.uri.clone();

    match notification.reason.as_str() {
        "follow" => Some(Pending::Ready(RawEvent::Follow { user, uri })),
        "like" => Some(Pending::Like {
            subject_uri: notification.reason_subject.clone()?,
            user,
            uri,
        }),
        "repost" => Some(Pending::Repost {
            subject_uri: notification.reason_subject.clone()?,
            user,
            uri,
        }),
        "reply" => Some(Pending::Ready(RawEvent::Reply(post_from_notification(
            notification,
        )))),
        "mention" => Some(Pending::Ready(RawEvent::Mention(post_from_notification(
            notification,
        )))),
        "quote" => Some(Pending::Ready(RawEvent::Quote(post_from_notification(
            notification,
        )))),
        other => {
            debug!(reason = other, "Ignoring notification");
            None
        }
    }
}

async fn resolve(client: &AtpClient, pending: Pending) -> Option<RawEvent> {
    match pending {
        Pending::Ready(event) => Some(event),
        Pending::Like {
            subject_uri,
            user,
            uri,
        } => {
            let subject = like_subject(client, &subject_uri).await?;
            Some(RawEvent::Like { subject, user, uri })
        }
        Pending::Repost {
            subject_uri,
            user,
            uri,
        } => {
            let post = fetch_subject_post(client, &subject_uri).await?;
            Some(RawEvent::Repost { post, user, uri })
        }
    }
}

async fn like_subject(client: &AtpClient, subject_uri: &str) -> Option<LikeSubject> {
    let collection = match AtUri::parse(subject_uri) {
        Ok(parsed) => parsed.collection,
        Err(e) => {
            warn!(uri = subject_uri, error = %e, "Like subject is not a record URI");
            return None;
        }
    };

    let uri = subject_uri.to_string();
    match collection.as_str() {
        POST_COLLECTION => fetch_subject_post(client, subject_uri)
            .await
            .map(LikeSubject::Post),
        "app.bsky.feed.generator" => Some(LikeSubject::FeedGenerator { uri }),
        "app.bsky.graph.list" => Some(LikeSubject::List { uri }),
        "app.bsky.labeler.service" => Some(LikeSubject::Labeler { uri }),
        other => {
            debug!(collection = other, "Ignoring like of unknown record type");
            None
        }
    }
}

async fn fetch_subject_post(client: &AtpClient, uri: &str) -> Option<Post> {
    match client.get_post(uri).await {
        Ok(Some(post)) => Some(post),
        Ok(None) => {
            warn!(uri = uri, "Notification subject post not found, dropping");
            None
        }
        Err(e) => {
            warn!(uri = uri, error = %e, "Failed to fetch notification subject, dropping");
            None
        }
    }
}

/// Notification authors come as `profileView`, which never carries a banner.
pub fn profile_from_author(author: &ProfileView) -> Profile {
    Profile {
        did: author.did.as_str().to_string(),
        handle: author.handle.as_str().to_string(),
        display_name: author.display_name.clone(),
        avatar: author.avatar.clone(),
        description: author.description.clone(),
        banner: None,
    }
}

/// The post carried by a reply, mention or quote notification.
pub fn post_from_notification(notification: &list_notifications::Notification) -> Post {
    let record = serde_json::to_value(&notification.record).unwrap_or_default();
    let parts = decode_record(&record);
    Post {
        uri: notification.uri.clone(),
        cid: cid_string(&notification.cid),
        text: parts.text,
        author: Some(profile_from_author(&notification.author)),
        reply: parts.reply,
        embed: parts.embed,
    }
}
