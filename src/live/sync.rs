// LiveStatusSync — keep the Bluesky live status in step with the stream.
//
// While auto-sync is enabled a poller checks the liveness signal every
// interval. When the upstream value flips, the remote status is written
// (stream went live, status inactive) or deleted (stream ended, status
// active). Explicit set/clear calls from actions go through the same methods.
//
// At most one liveness check is in flight: a tick or `check_now` that finds
// another check running is skipped, and missed ticks are dropped. Stopping never cancels a running check;
// its result is dropped because the generation it was started under is gone.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::signal::{LiveSignalSource, StreamerAccount};
use crate::bluesky::client::{is_not_found, AccountClient};
use crate::bluesky::posting::upload_from_url;
use crate::bluesky::records::{
    self, ExternalCard, MAX_STATUS_DURATION_MINUTES, STATUS_COLLECTION, STATUS_RKEY,
};
use crate::bluesky::types::LiveStatus;

/// How often the liveness signal is polled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Duration requested when auto-sync sets the status.
pub const AUTO_SYNC_DURATION_MINUTES: u32 = MAX_STATUS_DURATION_MINUTES;

/// Clamp a requested duration to what the platform accepts.
pub fn clamp_duration(minutes: u32) -> u32 {
    minutes.clamp(1, MAX_STATUS_DURATION_MINUTES)
}

/// Observable sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub connected: bool,
    pub is_auto_sync_enabled: bool,
    pub last_known_upstream_live: bool,
}

#[derive(Default)]
struct Inner {
    state: SyncState,
    /// Bumped on every start/stop; a check started under an older
    /// generation is discarded.
    generation: u64,
    stop: Option<watch::Sender<bool>>,
}

pub struct LiveStatusSync {
    signal: Arc<dyn LiveSignalSource>,
    streamer: StreamerAccount,
    poll_interval: Duration,
    http: reqwest::Client,
    client: RwLock<Option<Arc<dyn AccountClient>>>,
    inner: Mutex<Inner>,
    /// Held for the whole of a check and the reconcile that follows it.
    check_lock: Mutex<()>,
}

impl LiveStatusSync {
    pub fn new(signal: Arc<dyn LiveSignalSource>, streamer: StreamerAccount) -> Self {
        Self::with_poll_interval(signal, streamer, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        signal: Arc<dyn LiveSignalSource>,
        streamer: StreamerAccount,
        poll_interval: Duration,
    ) -> Self {
        Self {
            signal,
            streamer,
            poll_interval,
            http: reqwest::Client::new(),
            client: RwLock::new(None),
            inner: Mutex::new(Inner::default()),
            check_lock: Mutex::new(()),
        }
    }

    pub fn streamer(&self) -> &StreamerAccount {
        &self.streamer
    }

    /// Use `client` for status reads and writes and mark the sync connected.
    pub async fn attach(&self, client: Arc<dyn AccountClient>) {
        *self.client.write().await = Some(client);
        self.inner.lock().await.state.connected = true;
    }

    /// Forget the client. Status calls fail closed until the next attach.
    pub async fn detach(&self) {
        *self.client.write().await = None;
        self.inner.lock().await.state.connected = false;
    }

    pub async fn state(&self) -> SyncState {
        self.inner.lock().await.state
    }

    async fn connected_client(&self) -> Option<Arc<dyn AccountClient>> {
        if !self.inner.lock().await.state.connected {
            return None;
        }
        self.client.read().await.clone()
    }

    /// Write the live status for `duration_minutes` (clamped to 1..=240).
    ///
    /// The streamer avatar becomes the link card thumbnail when it can be
    /// fetched and uploaded; otherwise the status goes out without a card.
    pub async fn set_live_status(&self, duration_minutes: u32) -> bool {
        let Some(client) = self.connected_client().await else {
            error!("Cannot set live status: not connected to Bluesky");
            return false;
        };

        if !self.streamer.logged_in {
            error!("Cannot set live status: streamer account not logged in");
            return false;
        }

        let duration = clamp_duration(duration_minutes);
        if duration != duration_minutes {
            debug!(
                requested = duration_minutes,
                duration = duration,
                "Live status duration clamped"
            );
        }

        let card = self.thumbnail_card(client.as_ref()).await;
        let record = records::live_status_record(duration, card.as_ref(), Utc::now());

        match client.put_record(STATUS_COLLECTION, STATUS_RKEY, record).await {
            Ok(_) => {
                info!(duration_minutes = duration, "Set live status on Bluesky");
                true
            }
            Err(e) => {
                error!(error = %e, "Error setting live status on Bluesky");
                false
            }
        }
    }

    async fn thumbnail_card(&self, client: &dyn AccountClient) -> Option<ExternalCard> {
        let avatar_url = self.streamer.avatar_url.as_deref()?;

        let thumb = match upload_from_url(client, &self.http, avatar_url).await {
            Ok(blob) if blob.size > 0 => blob,
            Ok(_) => {
                warn!("Uploaded avatar is empty, setting live status without thumbnail");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to upload avatar for live status thumbnail");
                return None;
            }
        };

        Some(ExternalCard {
            uri: self.streamer.channel_url(),
            title: "Twitch".to_string(),
            description: format!("{} is live on Twitch!", self.streamer.name()),
            thumb: Some(thumb),
        })
    }

    /// The status currently shown on the account's profile.
    pub async fn get_live_status(&self) -> Option<LiveStatus> {
        let Some(client) = self.connected_client().await else {
            error!("Cannot get live status: not connected to Bluesky");
            return None;
        };
        let did = client.session().await?.did;

        match client.get_live_status(&did).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Failed to read live status");
                None
            }
        }
    }

    pub async fn is_live_status_active(&self) -> bool {
        self.get_live_status()
            .await
            .is_some_and(|status| status.is_active_at(Utc::now()))
    }

    /// Delete the status record. Succeeds when there was nothing to delete.
    pub async fn clear_live_status(&self) -> bool {
        let Some(client) = self.connected_client().await else {
            error!("Cannot clear live status: not connected to Bluesky");
            return false;
        };
        let Some(session) = client.session().await else {
            error!("Cannot clear live status: no Bluesky session");
            return false;
        };

        match client.delete_record(&records::status_uri(&session.did)).await {
            Ok(()) => {
                info!("Cleared live status on Bluesky");
                true
            }
            Err(e) if is_not_found(&e) => {
                debug!("No live status to clear");
                true
            }
            Err(e) => {
                error!(error = %e, "Error clearing live status on Bluesky");
                false
            }
        }
    }

    /// Bring the remote status in line with `upstream_live`.
    pub async fn reconcile(&self, upstream_live: bool) {
        let active = self.is_live_status_active().await;
        if upstream_live && !active {
            self.set_live_status(AUTO_SYNC_DURATION_MINUTES).await;
        } else if !upstream_live && active {
            self.clear_live_status().await;
        } else {
            debug!(live = upstream_live, "Live status already consistent");
        }
    }

    /// Enable auto-sync: reconcile the last known upstream value now, then
    /// poll. Restarting replaces any running poller.
    pub async fn start(self: &Arc<Self>) {
        let (generation, last_known) = {
            let mut inner = self.inner.lock().await;
            if let Some(stop) = inner.stop.take() {
                let _ = stop.send(true);
            }
            inner.generation += 1;
            inner.state.is_auto_sync_enabled = true;
            (inner.generation, inner.state.last_known_upstream_live)
        };

        self.reconcile(last_known).await;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                // stopped or restarted while reconciling
                return;
            }
            inner.stop = Some(stop_tx);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            info!(
                interval_secs = this.poll_interval.as_secs(),
                "Live status auto-sync started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => this.poll_once(generation).await,
                }
            }

            debug!(generation = generation, "Live status poller stopped");
        });
    }

    /// Disable auto-sync. Leaves any status already set in place.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        inner.state.is_auto_sync_enabled = false;
        if let Some(stop) = inner.stop.take() {
            let _ = stop.send(true);
            info!("Live status auto-sync stopped");
        }
    }

    /// Run one poll tick now, outside the timer. Returns immediately when
    /// a check is already running.
    pub async fn check_now(&self) {
        let generation = self.inner.lock().await.generation;
        self.poll_once(generation).await;
    }

    async fn poll_once(&self, generation: u64) {
        let Ok(_running) = self.check_lock.try_lock() else {
            debug!("Live check already running, skipping");
            return;
        };

        let live = self.signal.check_is_live().await;

        {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_auto_sync_enabled || inner.generation != generation {
                debug!(live = live, "Auto-sync no longer active, discarding live check");
                return;
            }
            if live == inner.state.last_known_upstream_live {
                return;
            }
            inner.state.last_known_upstream_live = live;
        }

        info!(live = live, "Stream live state changed");
        self.reconcile(live).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_duration() {
        assert_eq!(clamp_duration(500), 240);
        assert_eq!(clamp_duration(240), 240);
        assert_eq!(clamp_duration(180), 180);
        assert_eq!(clamp_duration(0), 1);
    }
}
