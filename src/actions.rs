// Actions — the operations a host can trigger against the integration.
//
// Every action reports plain success or failure and logs the reason for a
// failure; nothing here returns an error to the caller.

use std::sync::Arc;

use tracing::error;

use crate::bluesky::client::AccountClient;
use crate::bluesky::posting::{PostOptions, PostPayload, Poster};
use crate::bluesky::types::Post;
use crate::events::{EventKind, NormalizedEvent};
use crate::integration::Integration;

/// Live status duration when the caller doesn't give one.
pub const DEFAULT_LIVE_DURATION_MINUTES: u32 = 180;

async fn connected_client(integration: &Integration, action: &str) -> Option<Arc<dyn AccountClient>> {
    let client = integration.client().await;
    if client.is_none() {
        error!(action = action, "Not connected to Bluesky");
    }
    client
}

async fn fetch_post(client: &dyn AccountClient, uri: &str, action: &str) -> Option<Post> {
    match client.get_post(uri).await {
        Ok(Some(post)) => Some(post),
        Ok(None) => {
            error!(action = action, uri = uri, "Post not found");
            None
        }
        Err(e) => {
            error!(action = action, uri = uri, error = %e, "Unable to fetch post");
            None
        }
    }
}

fn poster(client: Arc<dyn AccountClient>, action: &str) -> Option<Poster> {
    match Poster::new(client) {
        Ok(poster) => Some(poster),
        Err(e) => {
            error!(action = action, error = %e, "Unable to set up posting");
            None
        }
    }
}

/// Publish `payload`, optionally as a reply to the post at `reply_to`.
pub async fn post_to_bluesky(
    integration: &Integration,
    payload: &PostPayload,
    opts: &PostOptions,
    reply_to: Option<&str>,
) -> bool {
    const ACTION: &str = "post";

    if payload.text.trim().is_empty() && payload.images.is_empty() {
        error!(action = ACTION, "No text provided");
        return false;
    }

    let Some(client) = connected_client(integration, ACTION).await else {
        return false;
    };

    let parent = match reply_to {
        Some(uri) => match fetch_post(client.as_ref(), uri, ACTION).await {
            Some(parent) => Some(parent),
            None => return false,
        },
        None => None,
    };

    let Some(poster) = poster(client, ACTION) else {
        return false;
    };

    let result = match &parent {
        Some(parent) => poster.reply(parent, payload, opts).await,
        None => poster.post(payload, opts).await,
    };

    match result {
        Ok(_) => true,
        Err(e) => {
            error!(error = %e, "Error posting to Bluesky");
            false
        }
    }
}

/// Like the post at `uri`.
pub async fn like_post(integration: &Integration, uri: &str) -> bool {
    const ACTION: &str = "like";

    if uri.trim().is_empty() {
        error!(action = ACTION, "No post AT URI to like");
        return false;
    }

    let Some(client) = connected_client(integration, ACTION).await else {
        return false;
    };
    let Some(post) = fetch_post(client.as_ref(), uri, ACTION).await else {
        return false;
    };
    let Some(poster) = poster(client, ACTION) else {
        return false;
    };

    match poster.like(&post.strong_ref()).await {
        Ok(_) => true,
        Err(e) => {
            error!(error = %e, "Error liking post on Bluesky");
            false
        }
    }
}

/// Like the post a reply, quote or mention event is about.
pub async fn like_post_from_event(integration: &Integration, event: &NormalizedEvent) -> bool {
    if !matches!(
        event.kind,
        EventKind::Reply | EventKind::Quote | EventKind::Mention
    ) {
        error!(kind = %event.kind, "Liking only applies to reply, quote and mention events");
        return false;
    }

    let key = format!("{}AtUri", integration.prefixes().post);
    match event.fields.get(&key).cloned().flatten() {
        Some(uri) => like_post(integration, &uri).await,
        None => {
            error!(field = %key, "No post AT URI to like");
            false
        }
    }
}

/// Delete the post at `uri`. Only posts by the connected account are deleted.
pub async fn delete_post(integration: &Integration, uri: &str) -> bool {
    const ACTION: &str = "delete";

    let Some(client) = connected_client(integration, ACTION).await else {
        return false;
    };
    let Some(post) = fetch_post(client.as_ref(), uri, ACTION).await else {
        return false;
    };

    let own_did = client.session().await.map(|s| s.did);
    let author_did = post.author.as_ref().map(|a| a.did.clone());
    if own_did.is_none() || own_did != author_did {
        error!(uri = uri, "Post to delete is not from your account");
        return false;
    }

    match client.delete_record(&post.uri).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Error deleting post on Bluesky");
            false
        }
    }
}

/// Set the live status for `duration_minutes` (default 180, capped at 240).
pub async fn set_live_status(integration: &Integration, duration_minutes: Option<u32>) -> bool {
    integration
        .live()
        .set_live_status(duration_minutes.unwrap_or(DEFAULT_LIVE_DURATION_MINUTES))
        .await
}

pub async fn clear_live_status(integration: &Integration) -> bool {
    integration.live().clear_live_status().await
}
