use serde::Serialize;
use tokio::sync::broadcast;

use crate::bridge::BridgeConnection;
use crate::registry::DeviceId;

/// Notifications broadcast to anyone interested in bridge activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    BridgeStateChanged { state: BridgeConnection },
    /// A pairing session finished with a known device.
    DeviceAdded { device: DeviceId, friendly_name: String },
    DeviceRemoved { device: DeviceId, friendly_name: String },
    DeviceRenamed { device: DeviceId, from: String, to: String },
    /// A device sent fresh state.
    Heartbeat { device: DeviceId },
}

/// Capacity of the broadcast buffer; slow subscribers lag past this.
const EVENT_BUS_CAPACITY: usize = 256;

/// Typed broadcast bus.
///
/// `subscribe` hands out a receiver; dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }
}
