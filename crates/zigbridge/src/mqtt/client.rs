use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::EventLoop;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

/// MQTT message received from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Trait for MQTT client operations
///
/// Lets the transport run against a broker or an in-memory double.
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// Publish a message to an MQTT topic
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Wait for the next message from subscribed topics
    ///
    /// Returns None if the client has stopped delivering.
    async fn poll_message(&mut self) -> Option<MqttMessage>;
}

fn not_connected() -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "MQTT client not connected. Call connect() first.",
    ))
}

/// In-memory client for tests.
///
/// Messages injected through a [`MockBroker`] are handed out by
/// `poll_message`; publishes and subscriptions are recorded there.
#[derive(Debug)]
pub struct MockMqttClient {
    broker: MockBroker,
    inbox: mpsc::UnboundedReceiver<MqttMessage>,
    is_connected: bool,
}

/// Test side of a [`MockMqttClient`]. Clones share state.
#[derive(Debug, Clone)]
pub struct MockBroker {
    inbox: mpsc::UnboundedSender<MqttMessage>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, bool)>>>,
    closed: Arc<AtomicBool>,
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMqttClient {
    /// Create a new mock MQTT client
    pub fn new() -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        Self {
            broker: MockBroker {
                inbox: tx,
                subscriptions: Arc::default(),
                published: Arc::default(),
                closed: Arc::default(),
            },
            inbox,
            is_connected: false,
        }
    }

    pub fn broker(&self) -> MockBroker {
        self.broker.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }
}

impl MockBroker {
    /// Queue a message for the client to receive.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let _ = self.inbox.send(MqttMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            retain: false,
        });
    }

    /// Drop the connection for good. Queued messages are discarded and
    /// `poll_message` returns None from then on.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Everything published so far as `(topic, payload)` text pairs.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published
            .lock()
            .map(|p| {
                p.iter()
                    .map(|(topic, payload, _)| {
                        (topic.clone(), String::from_utf8_lossy(payload).into_owned())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        if !self.is_connected {
            return Err(not_connected());
        }
        if let Ok(mut subscriptions) = self.broker.subscriptions.lock() {
            subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        if !self.is_connected {
            return Err(not_connected());
        }
        if let Ok(mut published) = self.broker.published.lock() {
            published.push((topic.to_string(), payload.to_vec(), retain));
        }
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        if self.broker.closed.load(Ordering::SeqCst) {
            return None;
        }
        // The client keeps its own sender, so this waits rather than ending.
        self.inbox.recv().await
    }
}

/// Broker connection over rumqttc.
///
/// The event loop runs in its own task from `connect` on. Subscriptions
/// are remembered and replayed whenever the broker acknowledges a new
/// connection, so a broker restart does not leave the bridge namespace
/// unsubscribed.
pub struct RumqttcClient {
    options: MqttOptions,
    client: Option<AsyncClient>,
    inbox: Option<mpsc::UnboundedReceiver<MqttMessage>>,
    topics: Arc<Mutex<Vec<String>>>,
    pump: Option<JoinHandle<()>>,
}

/// Request queue between `AsyncClient` and its event loop.
const REQUEST_CAPACITY: usize = 10;

/// Bridge device lists of large networks exceed rumqttc's default.
const MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    match (&config.username, &config.password) {
        (Some(username), Some(password)) => {
            options.set_credentials(username, password);
        }
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!("MQTT username and password must both be set, connecting anonymously");
        }
        (None, None) => {}
    }
    options
}

fn boxed(e: rumqttc::ClientError) -> Box<dyn Error + Send> {
    Box::new(e)
}

impl RumqttcClient {
    pub fn new(config: &MqttConfig) -> anyhow::Result<Self> {
        if config.keep_alive_secs == 0 {
            anyhow::bail!("mqtt.keep_alive_secs must be at least 1");
        }
        Ok(Self {
            options: options(config),
            client: None,
            inbox: None,
            topics: Arc::default(),
            pump: None,
        })
    }

    async fn pump(
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Arc<Mutex<Vec<String>>>,
        inbox: mpsc::UnboundedSender<MqttMessage>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = MqttMessage {
                        topic: publish.topic.to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    };
                    if inbox.send(msg).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    tracing::info!("Connected to MQTT broker ({:?})", ack.code);
                    let topics = topics.lock().map(|t| t.clone()).unwrap_or_default();
                    for topic in topics {
                        // The event loop is this task, so never wait on the request queue here.
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            tracing::warn!("Failed to resubscribe to {}: {}", topic, e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
        tracing::info!("MQTT event loop task exiting");
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (tx, inbox) = mpsc::unbounded_channel();

        if let Some(previous) = self.pump.replace(tokio::spawn(Self::pump(
            event_loop,
            client.clone(),
            self.topics.clone(),
            tx,
        ))) {
            previous.abort();
        }
        self.client = Some(client);
        self.inbox = Some(inbox);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;
        if let Ok(mut topics) = self.topics.lock() {
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        // Also replayed on every ConnAck.
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(boxed)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(boxed)
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        self.inbox.as_mut()?.recv().await
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
