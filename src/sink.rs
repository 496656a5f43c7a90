// Event sinks — where normalized events go.
//
// The daemon writes one JSON object per line to stdout so any host process
// can consume the stream. Tests and embedders can hand in a channel instead.

use std::io::Write;

use tokio::sync::mpsc;
use tracing::warn;

use crate::events::NormalizedEvent;

/// Receives each normalized event exactly once.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NormalizedEvent);
}

/// Writes `{"kind": ..., "fields": {...}}` lines to stdout.
#[derive(Debug, Default)]
pub struct JsonLinesSink;

impl EventSink for JsonLinesSink {
    fn emit(&self, event: NormalizedEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "Failed to serialize event");
                return;
            }
        };

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            warn!(kind = %event.kind, error = %e, "Failed to write event");
        }
    }
}

impl EventSink for mpsc::UnboundedSender<NormalizedEvent> {
    fn emit(&self, event: NormalizedEvent) {
        if self.send(event).is_err() {
            warn!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventFields, EventKind};

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fields = EventFields::new();
        fields.insert("blueskyUserHandle".to_string(), Some("fan.bsky.social".to_string()));
        fields.insert("blueskyUserBio".to_string(), None);

        tx.emit(NormalizedEvent {
            kind: EventKind::Follow,
            fields,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Follow);
        assert_eq!(event.fields["blueskyUserBio"], None);
    }

    #[test]
    fn test_event_json_shape() {
        let mut fields = EventFields::new();
        fields.insert("blueskyPostText".to_string(), Some("hi".to_string()));
        fields.insert("blueskyPostAuthorBannerUrl".to_string(), None);
        let event = NormalizedEvent {
            kind: EventKind::Mention,
            fields,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "mention");
        assert_eq!(json["fields"]["blueskyPostText"], "hi");
        assert!(json["fields"]["blueskyPostAuthorBannerUrl"].is_null());
    }
}
