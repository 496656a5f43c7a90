// AT Protocol account client — authenticated XRPC over HTTP.
//
// `AccountClient` is the capability set the rest of the crate talks to:
// login, post lookup, record writes, blob upload, the live-status view and
// the real-time notification feed. `AtpClient` is the reqwest-backed
// implementation; tests swap in an in-memory one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::notifications::{self, EventFeed};
use super::posts;
use super::records::AtUri;
use super::types::{BlobRef, LiveStatus, Post, Session, StrongRef};

/// Default entryway for password logins.
pub const DEFAULT_SERVICE_URL: &str = "https://bsky.social";

/// How often the notification feed polls when nothing else is configured.
pub const DEFAULT_FEED_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// An XRPC error response (`{"error": ..., "message": ...}` plus HTTP status).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("XRPC {nsid} returned {status}: {}", describe(.error, .message))]
pub struct XrpcError {
    pub nsid: String,
    pub status: u16,
    pub error: Option<String>,
    pub message: Option<String>,
}

fn describe(error: &Option<String>, message: &Option<String>) -> String {
    match (error, message) {
        (Some(error), Some(message)) => format!("{error}: {message}"),
        (Some(error), None) => error.clone(),
        (None, Some(message)) => message.clone(),
        (None, None) => "no error body".to_string(),
    }
}

impl XrpcError {
    /// The referenced record or actor does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
            || matches!(
                self.error.as_deref(),
                Some("RecordNotFound") | Some("NotFound") | Some("ProfileNotFound")
            )
    }

    /// The access token has expired and the session should be refreshed.
    pub fn is_expired_token(&self) -> bool {
        self.error.as_deref() == Some("ExpiredToken")
    }
}

/// True when `err` (anywhere in its chain) is a not-found XRPC error.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<XrpcError>())
        .any(XrpcError::is_not_found)
}

/// The remote account operations the integration depends on.
///
/// Implementations are shared across tasks behind `Arc<dyn AccountClient>`.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Create a session. Replaces any session held before.
    async fn login(&self, identifier: &str, password: &str) -> Result<Session>;

    /// The current session, if logged in.
    async fn session(&self) -> Option<Session>;

    /// Fetch a single post. `Ok(None)` when the post does not exist.
    async fn get_post(&self, uri: &str) -> Result<Option<Post>>;

    /// Resolve a handle to its DID.
    async fn resolve_handle(&self, handle: &str) -> Result<String>;

    /// The live status shown on `actor`'s profile, if any.
    async fn get_live_status(&self, actor: &str) -> Result<Option<LiveStatus>>;

    /// Create a record with a server-assigned key.
    async fn create_record(&self, collection: &str, record: serde_json::Value)
        -> Result<StrongRef>;

    /// Create or fully replace the record at `collection/rkey`.
    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<StrongRef>;

    /// Delete the record at `uri`. Deleting a missing record is not an error.
    async fn delete_record(&self, uri: &str) -> Result<()>;

    /// Upload raw bytes as a blob.
    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef>;

    /// Start receiving social interactions for the logged-in account.
    fn open_feed(&self) -> EventFeed;
}

/// Builds a fresh client per (re)configuration, pointed at the configured service.
pub trait ClientFactory: Send + Sync {
    fn create(&self, service: &str) -> Result<Arc<dyn AccountClient>>;
}

/// Factory for [`AtpClient`].
pub struct AtpClientFactory {
    pub feed_interval: Duration,
}

impl Default for AtpClientFactory {
    fn default() -> Self {
        Self {
            feed_interval: DEFAULT_FEED_POLL_INTERVAL,
        }
    }
}

impl ClientFactory for AtpClientFactory {
    fn create(&self, service: &str) -> Result<Arc<dyn AccountClient>> {
        let client = AtpClient::with_feed_interval(service, self.feed_interval)?;
        Ok(Arc::new(client))
    }
}

/// Authenticated HTTP client for a PDS's XRPC endpoints.
///
/// Cheap to clone; clones share the session. The notification feed holds a
/// clone so it keeps polling with whatever session is current.
#[derive(Clone)]
pub struct AtpClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    session: RwLock<Option<Session>>,
    feed_interval: Duration,
}

impl AtpClient {
    /// Create a client for the given service URL (e.g. `https://bsky.social`).
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_feed_interval(base_url, DEFAULT_FEED_POLL_INTERVAL)
    }

    /// Like [`AtpClient::new`], with a custom notification polling interval.
    pub fn with_feed_interval(base_url: &str, feed_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("skybridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                session: RwLock::new(None),
                feed_interval,
            }),
        })
    }

    fn url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.inner.base_url, nsid)
    }

    async fn access_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_jwt.clone())
    }

    /// Send a request built by `build`, refreshing the session once if the
    /// access token has expired.
    async fn send<F>(&self, nsid: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client, Option<&str>) -> reqwest::RequestBuilder,
    {
        debug!(nsid = nsid, "XRPC request");

        let token = self.access_token().await;
        let response = build(&self.inner.http, token.as_deref())
            .send()
            .await
            .with_context(|| format!("XRPC request failed: {nsid}"))?;

        match check_response(nsid, response).await {
            Err(err) if err.is_expired_token() => {
                info!(nsid = nsid, "Access token expired, refreshing session");
                self.refresh_session().await?;
                let token = self.access_token().await;
                let response = build(&self.inner.http, token.as_deref())
                    .send()
                    .await
                    .with_context(|| format!("XRPC request failed: {nsid}"))?;
                Ok(check_response(nsid, response).await?)
            }
            other => Ok(other?),
        }
    }

    /// GET an XRPC query and deserialize the response.
    pub async fn xrpc_get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.url(nsid);
        let response = self
            .send(nsid, |http, token| with_auth(http.get(&url).query(params), token))
            .await?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {nsid} response"))
    }

    /// POST an XRPC procedure with a JSON body and deserialize the response.
    pub async fn xrpc_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.xrpc_post_raw(nsid, body).await?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {nsid} response"))
    }

    /// POST an XRPC procedure whose output we don't need.
    pub async fn xrpc_post_raw<B: Serialize + ?Sized>(
        &self,
        nsid: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.url(nsid);
        self.send(nsid, |http, token| with_auth(http.post(&url).json(body), token))
            .await
    }

    async fn refresh_session(&self) -> Result<()> {
        let refresh_jwt = self
            .inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_jwt.clone())
            .context("Cannot refresh session: not logged in")?;

        let nsid = "com.atproto.server.refreshSession";
        let response = self
            .inner
            .http
            .post(self.url(nsid))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .context("Session refresh request failed")?;
        let response = check_response(nsid, response).await?;

        let session: Session = response
            .json()
            .await
            .context("Failed to parse refreshed session")?;
        *self.inner.session.write().await = Some(session);
        Ok(())
    }

    /// Mark notifications up to `seen_at` as read.
    pub async fn update_seen(&self, seen_at: &str) -> Result<()> {
        self.xrpc_post_raw(
            "app.bsky.notification.updateSeen",
            &serde_json::json!({ "seenAt": seen_at }),
        )
        .await?;
        Ok(())
    }

    async fn repo_did(&self) -> Result<String> {
        self.session()
            .await
            .map(|s| s.did)
            .context("Not logged in to Bluesky")
    }
}

fn with_auth(builder: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn check_response(
    nsid: &str,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, XrpcError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (error, message) = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => (parsed.error, parsed.message),
        Err(_) => (None, Some(body).filter(|b| !b.is_empty())),
    };

    Err(XrpcError {
        nsid: nsid.to_string(),
        status,
        error,
        message,
    })
}

// -- Serde types for XRPC responses --

#[derive(Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

#[derive(Deserialize)]
struct ProfileStatusResponse {
    #[serde(default)]
    status: Option<LiveStatus>,
}

#[derive(Deserialize)]
struct UploadBlobResponse {
    blob: BlobRef,
}

#[async_trait]
impl AccountClient for AtpClient {
    async fn login(&self, identifier: &str, password: &str) -> Result<Session> {
        let nsid = "com.atproto.server.createSession";
        let response = self
            .inner
            .http
            .post(self.url(nsid))
            .json(&serde_json::json!({ "identifier": identifier, "password": password }))
            .send()
            .await
            .context("Login request failed")?;
        let response = check_response(nsid, response).await?;

        let session: Session = response
            .json()
            .await
            .context("Failed to parse session")?;

        info!(handle = %session.handle, did = %session.did, "Logged in to Bluesky");
        *self.inner.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Option<Session> {
        self.inner.session.read().await.clone()
    }

    async fn get_post(&self, uri: &str) -> Result<Option<Post>> {
        let output: posts::GetPostsResponse = self
            .xrpc_get("app.bsky.feed.getPosts", &[("uris", uri)])
            .await
            .with_context(|| format!("Failed to fetch post {uri}"))?;

        Ok(output.posts.into_iter().next().map(posts::post_from_view))
    }

    async fn resolve_handle(&self, handle: &str) -> Result<String> {
        let resp: ResolveHandleResponse = self
            .xrpc_get("com.atproto.identity.resolveHandle", &[("handle", handle)])
            .await
            .with_context(|| format!("Failed to resolve handle @{handle}"))?;
        Ok(resp.did)
    }

    async fn get_live_status(&self, actor: &str) -> Result<Option<LiveStatus>> {
        let profile: ProfileStatusResponse = self
            .xrpc_get("app.bsky.actor.getProfile", &[("actor", actor)])
            .await
            .with_context(|| format!("Failed to fetch profile for {actor}"))?;
        Ok(profile.status)
    }

    async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
    ) -> Result<StrongRef> {
        let repo = self.repo_did().await?;
        self.xrpc_post(
            "com.atproto.repo.createRecord",
            &serde_json::json!({ "repo": repo, "collection": collection, "record": record }),
        )
        .await
        .with_context(|| format!("Failed to create {collection} record"))
    }

    async fn put_record(
        &self,
        collection: &str,
        rkey: &str,
        record: serde_json::Value,
    ) -> Result<StrongRef> {
        let repo = self.repo_did().await?;
        self.xrpc_post(
            "com.atproto.repo.putRecord",
            &serde_json::json!({
                "repo": repo,
                "collection": collection,
                "rkey": rkey,
                "record": record,
            }),
        )
        .await
        .with_context(|| format!("Failed to put {collection}/{rkey}"))
    }

    async fn delete_record(&self, uri: &str) -> Result<()> {
        let at_uri = AtUri::parse(uri)?;
        let result = self
            .xrpc_post_raw(
                "com.atproto.repo.deleteRecord",
                &serde_json::json!({
                    "repo": at_uri.authority,
                    "collection": at_uri.collection,
                    "rkey": at_uri.rkey,
                }),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => {
                debug!(uri = uri, "Record already absent");
                Ok(())
            }
            Err(err) => Err(err.context(format!("Failed to delete {uri}"))),
        }
    }

    async fn upload_blob(&self, bytes: Vec<u8>, content_type: &str) -> Result<BlobRef> {
        let nsid = "com.atproto.repo.uploadBlob";
        let url = self.url(nsid);
        let response = self
            .send(nsid, |http, token| {
                with_auth(
                    http.post(&url)
                        .header(reqwest::header::CONTENT_TYPE, content_type)
                        .body(bytes.clone()),
                    token,
                )
            })
            .await?;

        let output: UploadBlobResponse = response
            .json()
            .await
            .context("Failed to parse uploadBlob response")?;
        Ok(output.blob)
    }

    fn open_feed(&self) -> EventFeed {
        notifications::spawn_feed(self.clone(), self.inner.feed_interval)
    }
}
