use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::client::MqttClient;
use crate::bridge::OutboundReceiver;
use crate::bridge::Topics;
use crate::engine::EngineHandle;

/// How long the inbound pump holds the client lock while waiting for a
/// message, so outbound publishes get a turn.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Moves messages between an [`MqttClient`] and the engine.
pub struct MqttTransport<C: MqttClient> {
    client: Arc<Mutex<C>>,
    topics: Topics,
}

/// Background tasks of a started transport.
pub struct TransportTasks {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl TransportTasks {
    pub fn abort(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

impl Drop for TransportTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

impl<C: MqttClient + 'static> MqttTransport<C> {
    pub fn new(client: C, topics: Topics) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            topics,
        }
    }

    /// Connect, subscribe to the bridge namespace and start pumping.
    pub async fn start(
        self,
        engine: EngineHandle,
        outbound: OutboundReceiver,
    ) -> Result<TransportTasks, Box<dyn Error + Send>> {
        let subscription = self.topics.subscription();
        {
            let mut client = self.client.lock().await;
            client.connect().await?;
            info!("Subscribing to {}", subscription);
            client.subscribe(&subscription).await?;
        }

        let inbound = tokio::spawn(Self::inbound_task(self.client.clone(), engine));
        let outbound = tokio::spawn(Self::outbound_task(self.client, outbound));

        Ok(TransportTasks { inbound, outbound })
    }

    async fn inbound_task(client: Arc<Mutex<C>>, engine: EngineHandle) {
        loop {
            // Hold the lock only briefly so the outbound task can publish
            let polled = {
                let mut client_guard = client.lock().await;
                tokio::time::timeout(POLL_INTERVAL, client_guard.poll_message()).await
            };

            match polled {
                Ok(Some(msg)) => {
                    if engine.deliver(msg).await.is_err() {
                        info!("Engine stopped, MQTT inbound task exiting");
                        break;
                    }
                }
                Ok(None) => {
                    info!("MQTT client stopped delivering, inbound task exiting");
                    break;
                }
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    async fn outbound_task(client: Arc<Mutex<C>>, mut outbound: OutboundReceiver) {
        while let Some(msg) = outbound.recv().await {
            debug!("Sending to {}", msg.topic);
            let mut client = client.lock().await;
            if let Err(e) = client.publish(&msg.topic, &msg.payload, false).await {
                error!("Failed to publish to {}: {}", msg.topic, e);
            }
        }
        info!("Outbox closed, MQTT outbound task exiting");
    }
}
