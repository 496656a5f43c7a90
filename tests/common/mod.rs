// Shared test doubles: an in-memory account client, a scriptable liveness
// signal and helpers for building posts and profiles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, Notify};

use skybridge::bluesky::client::{AccountClient, ClientFactory, XrpcError};
use skybridge::bluesky::notifications::EventFeed;
use skybridge::bluesky::records::{status_uri, AtUri, STATUS_COLLECTION};
use skybridge::bluesky::types::{
    BlobRef, CidLink, LiveStatus, Post, PostEmbed, Profile, RawEvent, ReplyRefs, Session,
    StrongRef,
};
use skybridge::live::signal::{LiveSignalSource, StreamerAccount};

pub const OWN_DID: &str = "did:plc:streamer";
pub const OWN_HANDLE: &str = "streamer.bsky.social";

pub fn profile(did: &str, handle: &str) -> Profile {
    Profile {
        did: did.to_string(),
        handle: handle.to_string(),
        display_name: Some(format!("{handle} display")),
        avatar: Some(format!("https://cdn.example/{handle}.jpg")),
        description: None,
        banner: None,
    }
}

pub fn post(uri: &str, text: &str, author: Profile) -> Post {
    Post {
        uri: uri.to_string(),
        cid: format!("cid-{}", uri.rsplit('/').next().unwrap_or("x")),
        text: text.to_string(),
        author: Some(author),
        reply: None,
        embed: None,
    }
}

pub fn reply_to(uri: &str, text: &str, author: Profile, parent: &Post) -> Post {
    let mut reply = post(uri, text, author);
    reply.reply = Some(ReplyRefs {
        root: parent.strong_ref(),
        parent: parent.strong_ref(),
    });
    reply
}

pub fn quote_of(uri: &str, text: &str, author: Profile, quoted_uri: &str) -> Post {
    let mut quote = post(uri, text, author);
    quote.embed = Some(PostEmbed::Record {
        uri: quoted_uri.to_string(),
    });
    quote
}

pub fn own_post(rkey: &str, text: &str) -> Post {
    post(
        &format!("at://{OWN_DID}/app.bsky.feed.post/{rkey}"),
        text,
        profile(OWN_DID, OWN_HANDLE),
    )
}

/// In-memory stand-in for a Bluesky account.
pub struct MockClient {
    pub feed: broadcast::Sender<RawEvent>,
    posts: Mutex<HashMap<String, Post>>,
    handles: Mutex<HashMap<String, String>>,
    session: Mutex<Option<Session>>,
    pub live_status: Mutex<Option<LiveStatus>>,
    pub created: Mutex<Vec<(String, Value)>>,
    pub put: Mutex<Vec<(String, String, Value)>>,
    pub deleted: Mutex<Vec<String>>,
    pub uploads: AtomicUsize,
    pub logins: AtomicUsize,
    pub fail_login: AtomicBool,
    pub fail_fetches: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Report deleting a missing record as RecordNotFound instead of success.
    pub strict_delete: AtomicBool,
    /// When set, post fetches signal `fetch_started` and wait on the gate.
    pub fetch_gate: Mutex<Option<Arc<Notify>>>,
    pub fetch_started: Notify,
    next_rkey: AtomicUsize,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(64);
        Arc::new(Self {
            feed,
            posts: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            live_status: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            put: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            uploads: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            fail_login: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            strict_delete: AtomicBool::new(false),
            fetch_gate: Mutex::new(None),
            fetch_started: Notify::new(),
            next_rkey: AtomicUsize::new(1),
        })
    }

    /// A client that is already logged in as the streamer.
    pub fn logged_in() -> Arc<Self> {
        let client = Self::new();
        *client.session.lock().unwrap() = Some(session());
        client
    }

    pub fn add_post(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.uri.clone(), post);
    }

    pub fn add_handle(&self, handle: &str, did: &str) {
        self.handles
            .lock()
            .unwrap()
            .insert(handle.to_string(), did.to_string());
    }

    pub fn set_status(&self, status: Option<LiveStatus>) {
        *self.live_status.lock().unwrap() = status;
    }

    pub fn status(&self) -> Option<LiveStatus> {
        self.live_status.lock().unwrap().clone()
    }

    pub fn status_writes(&self) -> Vec<Value> {
        self.put
            .lock()
            .unwrap()
            .iter()
            .filter(|(collection, _, _)| collection == STATUS_COLLECTION)
            .map(|(_, _, record)| record.clone())
            .collect()
    }

    pub fn created_in(&self, collection: &str) -> Vec<Value> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn send(&self, event: RawEvent) {
        self.feed.send(event).expect("feed has no subscribers");
    }

    fn next_ref(&self, collection: &str) -> StrongRef {
        let n = self.next_rkey.fetch_add(1, Ordering::SeqCst);
        StrongRef {
            uri: format!("at://{OWN_DID}/{collection}/rk{n}"),
            cid: format!("cid{n}"),
        }
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("write rejected");
        }
        Ok(())
    }
}

pub fn session() -> Session {
    Session {
        did: OWN_DID.to_string(),
        handle: OWN_HANDLE.to_string(),
        access_jwt: "access".to_string(),
        refresh_jwt: "refresh".to_string(),
    }
}

/// A status as the server would report it right after a write.
pub fn active_status(minutes: i64) -> LiveStatus {
    LiveStatus {
        status: "app.bsky.actor.status#live".to_string(),
        record: None,
        embed: None,
        expires_at: Some(Utc::now() + Duration::minutes(minutes)),
        is_active: Some(true),
        is_disabled: Some(false),
    }
}

#[async_trait]
impl AccountClient for MockClient {
    async fn login(&self, identifier: &str, _password: &str) -> Result<Session> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(XrpcError {
                nsid: "com.atproto.server.createSession".to_string(),
                status: 401,
                error: Some("AuthenticationRequired".to_string()),
                message: Some("Invalid identifier or password".to_string()),
            }
            .into());
        }
        let mut session = session();
        session.handle = identifier.to_string();
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }

    async fn get_post(&self, uri: &str) -> Result<Option<Post>> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.fetch_started.notify_one();
            gate.notified().await;
        }
        if self.fail_fetches.load(Ordering::SeqCst) {
            anyhow::bail!("network unreachable");
        }
        Ok(self.posts.lock().unwrap().get(uri).cloned())
    }

    async fn resolve_handle(&self, handle: &str) -> Result<String> {
        self.handles
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unable to resolve handle"))
    }

    async fn get_live_status(&self, _actor: &str) -> Result<Option<LiveStatus>> {
        Ok(self.status())
    }

    async fn create_record(&self, collection: &str, record: Value) -> Result<StrongRef> {
        self.check_writes()?;
        self.created
            .lock()
            .unwrap()
            .push((collection.to_string(), record));
        Ok(self.next_ref(collection))
    }

    async fn put_record(&self, collection: &str, rkey: &str, record: Value) -> Result<StrongRef> {
        self.check_writes()?;
        if collection == STATUS_COLLECTION {
            let minutes = record["durationMinutes"].as_i64().unwrap_or(0);
            let mut status = active_status(minutes);
            status.record = Some(record.clone());
            status.embed = record.get("embed").cloned();
            self.set_status(Some(status));
        }
        self.put
            .lock()
            .unwrap()
            .push((collection.to_string(), rkey.to_string(), record));
        Ok(StrongRef {
            uri: AtUri::format(OWN_DID, collection, rkey),
            cid: "cidput".to_string(),
        })
    }

    async fn delete_record(&self, uri: &str) -> Result<()> {
        self.check_writes()?;
        let existed = if uri == status_uri(OWN_DID) {
            self.live_status.lock().unwrap().take().is_some()
        } else {
            self.posts.lock().unwrap().remove(uri).is_some()
        };
        self.deleted.lock().unwrap().push(uri.to_string());

        if !existed && self.strict_delete.load(Ordering::SeqCst) {
            return Err(XrpcError {
                nsid: "com.atproto.repo.deleteRecord".to_string(),
                status: 400,
                error: Some("RecordNotFound".to_string()),
                message: None,
            }
            .into());
        }
        Ok(())
    }

    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(BlobRef {
            kind: "blob".to_string(),
            reference: CidLink {
                link: "bafkreiupload".to_string(),
            },
            mime_type: content_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    fn open_feed(&self) -> EventFeed {
        EventFeed::from_receiver(self.feed.subscribe())
    }
}

/// Hands out the same mock client on every (re)configuration.
pub struct MockFactory {
    pub client: Arc<MockClient>,
    pub created: AtomicUsize,
}

impl MockFactory {
    pub fn new(client: Arc<MockClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            created: AtomicUsize::new(0),
        })
    }
}

impl ClientFactory for MockFactory {
    fn create(&self, _service: &str) -> Result<Arc<dyn AccountClient>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}

/// A liveness signal the test flips by hand.
#[derive(Default)]
pub struct FakeSignal {
    pub live: AtomicBool,
    pub checks: AtomicUsize,
}

impl FakeSignal {
    pub fn new(live: bool) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicBool::new(live),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }
}

#[async_trait]
impl LiveSignalSource for FakeSignal {
    async fn check_is_live(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.live.load(Ordering::SeqCst)
    }
}

/// A logged-in streamer without an avatar, so no thumbnail download happens.
pub fn streamer() -> StreamerAccount {
    StreamerAccount {
        username: "streamer".to_string(),
        display_name: Some("Streamer".to_string()),
        avatar_url: None,
        logged_in: true,
    }
}
