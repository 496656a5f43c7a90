// Integration lifecycle — login, event wiring and live-status sync.
//
// One `Integration` owns everything tied to the current settings: the logged
// in client, the feed subscription and the sync's attachment. Every
// `configure` tears all of that down before building it again, so stale
// listeners never double-deliver events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bluesky::client::{AccountClient, ClientFactory};
use crate::config::IntegrationSettings;
use crate::events::{self, FieldPrefixes, Subscription};
use crate::live::sync::LiveStatusSync;
use crate::sink::EventSink;

/// Upper bound on the best-effort status clear during shutdown.
pub const SHUTDOWN_CLEAR_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Runtime {
    connected: bool,
    client: Option<Arc<dyn AccountClient>>,
    subscription: Option<Subscription>,
}

pub struct Integration {
    factory: Arc<dyn ClientFactory>,
    sink: Arc<dyn EventSink>,
    prefixes: FieldPrefixes,
    live: Arc<LiveStatusSync>,
    runtime: Mutex<Runtime>,
}

impl Integration {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        sink: Arc<dyn EventSink>,
        live: Arc<LiveStatusSync>,
        prefixes: FieldPrefixes,
    ) -> Self {
        Self {
            factory,
            sink,
            prefixes,
            live,
            runtime: Mutex::new(Runtime::default()),
        }
    }

    pub fn live(&self) -> &Arc<LiveStatusSync> {
        &self.live
    }

    pub fn prefixes(&self) -> &FieldPrefixes {
        &self.prefixes
    }

    pub async fn is_connected(&self) -> bool {
        self.runtime.lock().await.connected
    }

    /// The logged-in client, if connected.
    pub async fn client(&self) -> Option<Arc<dyn AccountClient>> {
        let runtime = self.runtime.lock().await;
        if runtime.connected {
            runtime.client.clone()
        } else {
            None
        }
    }

    /// (Re)initialize from `settings`. Returns whether the account is connected.
    ///
    /// Login failures are logged and leave the integration disconnected until
    /// the next call; they are never retried on a timer.
    pub async fn configure(&self, settings: &IntegrationSettings) -> bool {
        let mut runtime = self.runtime.lock().await;

        info!(username = %settings.account.username, "Bluesky integration configuring");

        if let Some(subscription) = runtime.subscription.take() {
            subscription.close();
        }
        self.live.stop().await;
        self.live.detach().await;
        runtime.client = None;

        if !settings.has_credentials() {
            warn!("Bluesky integration account login is missing");
            runtime.connected = false;
            return false;
        }

        let client = match self.login(settings).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Error logging into Bluesky");
                runtime.connected = false;
                return false;
            }
        };

        if !runtime.connected {
            info!("Bluesky integration connected");
        }
        runtime.connected = true;

        let feed = client.open_feed();
        runtime.subscription = Some(events::subscribe(
            Arc::clone(&client),
            feed,
            Arc::clone(&self.sink),
            self.prefixes.clone(),
        ));

        self.live.attach(Arc::clone(&client)).await;
        runtime.client = Some(client);

        if settings.options.automatically_sync_live_status_when_streaming {
            self.live.start().await;
        }

        true
    }

    async fn login(&self, settings: &IntegrationSettings) -> anyhow::Result<Arc<dyn AccountClient>> {
        let client = self.factory.create(&settings.account.service)?;
        client
            .login(&settings.account.username, &settings.account.app_password)
            .await?;
        Ok(client)
    }

    /// Stop everything. If auto-sync was running, clear the live status once,
    /// bounded by [`SHUTDOWN_CLEAR_TIMEOUT`]; failures are only logged.
    pub async fn shutdown(&self) {
        let mut runtime = self.runtime.lock().await;

        if let Some(subscription) = runtime.subscription.take() {
            subscription.close();
        }

        let was_syncing = self.live.state().await.is_auto_sync_enabled;
        self.live.stop().await;

        if was_syncing && runtime.connected {
            match tokio::time::timeout(SHUTDOWN_CLEAR_TIMEOUT, self.live.clear_live_status()).await {
                Ok(true) => {}
                Ok(false) => warn!("Could not clear live status during shutdown"),
                Err(_) => warn!("Timed out clearing live status during shutdown"),
            }
        }

        self.live.detach().await;
        runtime.client = None;
        runtime.connected = false;
        info!("Bluesky integration shut down");
    }
}
