//! MQTT transport between the broker and the engine.

mod client;
mod transport;

pub use client::MockBroker;
pub use client::MockMqttClient;
pub use client::MqttClient;
pub use client::MqttMessage;
pub use client::RumqttcClient;
pub use transport::MqttTransport;
pub use transport::TransportTasks;
