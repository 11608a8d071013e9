// Real-time push of already-computed results to connected clients
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::votes::TargetKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Fire-and-forget publisher. Delivery failures are never reported back
/// to the caller.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value);

    /// A live feed of everything published from now on, if this
    /// broadcaster has a transport behind it.
    fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        None
    }
}

pub type DynBroadcaster = Arc<dyn Broadcaster>;

/// Drops everything. Used by tests and contexts without a transport.
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn publish(&self, topic: &str, _payload: serde_json::Value) {
        tracing::trace!(topic, "no transport, dropping event");
    }
}

/// In-process fan-out over a tokio broadcast channel. Slow subscribers
/// lose the oldest events once `capacity` is exceeded.
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Event>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        // No receivers is not an error
        if let Ok(receivers) = self.sender.send(event) {
            tracing::debug!(topic, receivers, "event published");
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        Some(self.sender.subscribe())
    }
}

pub mod topics {
    use super::TargetKind;

    /// Per-user feed, used for notifications.
    pub fn user(user_id: &str) -> String {
        format!("user:{}", user_id)
    }

    /// Per-post feed, used for score changes.
    pub fn target(kind: TargetKind, id: &str) -> String {
        format!("{}:{}", kind.as_str(), id)
    }
}
