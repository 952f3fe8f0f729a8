use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use super::topics::Topics;

/// A publish waiting to go out on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Receiving end, drained by the transport task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Fire-and-forget publisher for bridge commands.
///
/// Unbounded so the engine never waits on the transport.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
    topics: Topics,
}

impl Outbox {
    pub fn new(topics: Topics) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, topics }, rx)
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn publish(&self, topic: String, payload: impl Into<Vec<u8>>) {
        let msg = Outbound {
            topic,
            payload: payload.into(),
        };
        debug!("Publishing to {}: {}", msg.topic, msg.payload_str());
        if let Err(e) = self.tx.send(msg) {
            warn!("Dropping publish to {}: transport gone", e.0.topic);
        }
    }

    pub fn permit_join(&self, allow: bool) {
        let payload = if allow { "true" } else { "false" };
        self.publish(self.topics.permit_join(), payload);
    }

    pub fn query_device_list(&self) {
        self.publish(self.topics.query_device_list(), Vec::new());
    }

    pub fn remove_device(&self, friendly_name: &str) {
        self.publish(self.topics.remove_device(), friendly_name);
    }

    pub fn force_remove_device(&self, friendly_name: &str) {
        self.publish(self.topics.force_remove_device(), friendly_name);
    }

    pub fn rename_device(&self, old: &str, new: &str) {
        let payload = serde_json::json!({ "old": old, "new": new });
        self.publish(self.topics.rename_device(), payload.to_string());
    }
}
