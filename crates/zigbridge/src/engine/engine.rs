use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::message::Command;
use super::message::Input;
use super::message::InputReceiver;
use super::message::InputSender;
use super::scheduler::TokioScheduler;
use crate::bridge::Bridge;
use crate::bridge::BridgeSettings;
use crate::bridge::BridgeSummary;
use crate::bridge::Collaborators;
use crate::bridge::OutboundReceiver;
use crate::error::BridgeError;
use crate::event::EventBus;
use crate::mqtt::MqttMessage;
use crate::registry::DeviceId;
use crate::registry::DeviceRecord;
use crate::registry::DeviceRegistry;
use crate::registry::LocationId;
use crate::telemetry::TelemetrySink;

/// Capacity of the input channel. Transport and API wait when the engine
/// falls this far behind.
const INPUT_CHANNEL_SIZE: usize = 1024;

/// zigbridge engine
///
/// Owns the [`Bridge`] and feeds it one input at a time from a single
/// channel. Nothing else touches bridge state, so handlers never race.
pub struct Engine {
    bridge: Bridge,
    input_rx: InputReceiver,
}

impl Engine {
    /// Create an engine with its handle and the outbound queue the
    /// transport must drain.
    pub fn new(
        settings: BridgeSettings,
        registry: Box<dyn DeviceRegistry>,
        sink: Box<dyn TelemetrySink>,
        events: EventBus,
    ) -> (Self, EngineHandle, OutboundReceiver) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_SIZE);
        let scheduler = TokioScheduler::new(input_tx.downgrade());
        let (bridge, outbound) = Bridge::new(
            settings,
            Collaborators {
                registry,
                sink,
                scheduler: Box::new(scheduler),
                events,
            },
        );
        let engine = Self { bridge, input_rx };
        (engine, EngineHandle { input_tx }, outbound)
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Run until every [`EngineHandle`] is dropped. Returns the bridge so
    /// callers can inspect the final state.
    pub async fn run(mut self) -> Bridge {
        info!("Engine starting");

        while let Some(input) = self.input_rx.recv().await {
            self.handle_input(input);
        }

        info!("Engine shutting down");
        self.bridge
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Mqtt(msg) => {
                debug!("Received message on topic: {}", msg.topic);
                if let Err(e) = self.bridge.handle_message(&msg.topic, &msg.payload) {
                    match e {
                        BridgeError::Lookup(_) => debug!("Dropping message on {}: {}", msg.topic, e),
                        _ => warn!("Error handling message on {}: {}", msg.topic, e),
                    }
                }
            }
            Input::Timer(timer) => self.bridge.handle_timer(timer),
            Input::Command(cmd) => self.handle_command(cmd),
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        // A dropped reply means the caller gave up; the command still ran.
        match cmd {
            Command::AllowJoining {
                limit_to_one,
                device,
                reply,
            } => {
                let _ = reply.send(self.bridge.allow_joining(limit_to_one, device));
            }
            Command::BlockJoining { reply } => {
                self.bridge.block_joining();
                let _ = reply.send(());
            }
            Command::Discover { device, reply } => {
                let _ = reply.send(self.bridge.discover(device));
            }
            Command::AddPlaceholder {
                friendly_name,
                location,
                reply,
            } => {
                let _ = reply.send(self.bridge.add_placeholder(&friendly_name, location));
            }
            Command::RenameDevice {
                friendly_name,
                new_name,
                reply,
            } => {
                let _ = reply.send(self.bridge.rename_device(&friendly_name, &new_name));
            }
            Command::RemoveDevice {
                friendly_name,
                reply,
            } => {
                self.bridge.remove_device(&friendly_name);
                let _ = reply.send(());
            }
            Command::RequestDeviceList { reply } => {
                self.bridge.request_device_list();
                let _ = reply.send(());
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.bridge.devices());
            }
            Command::Summary { reply } => {
                let _ = reply.send(self.bridge.summary());
            }
        }
    }
}

/// Cloneable access to a running [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    input_tx: InputSender,
}

fn engine_gone() -> BridgeError {
    BridgeError::Transport("engine stopped".to_string())
}

impl EngineHandle {
    /// Hand an inbound MQTT message to the engine.
    pub async fn deliver(&self, msg: MqttMessage) -> Result<(), BridgeError> {
        self.input_tx
            .send(Input::Mqtt(msg))
            .await
            .map_err(|_| engine_gone())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(Input::Command(make(reply)))
            .await
            .map_err(|_| engine_gone())?;
        rx.await.map_err(|_| engine_gone())
    }

    pub async fn allow_joining(
        &self,
        limit_to_one: bool,
        device: Option<DeviceId>,
    ) -> Result<(), BridgeError> {
        self.request(|reply| Command::AllowJoining {
            limit_to_one,
            device,
            reply,
        })
        .await?
    }

    pub async fn block_joining(&self) -> Result<(), BridgeError> {
        self.request(|reply| Command::BlockJoining { reply }).await
    }

    pub async fn discover(&self, device: DeviceId) -> Result<(), BridgeError> {
        self.request(|reply| Command::Discover { device, reply })
            .await?
    }

    pub async fn add_placeholder(
        &self,
        friendly_name: impl Into<String>,
        location: Option<LocationId>,
    ) -> Result<DeviceId, BridgeError> {
        let friendly_name = friendly_name.into();
        self.request(|reply| Command::AddPlaceholder {
            friendly_name,
            location,
            reply,
        })
        .await?
    }

    pub async fn rename_device(
        &self,
        friendly_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Result<bool, BridgeError> {
        let friendly_name = friendly_name.into();
        let new_name = new_name.into();
        self.request(|reply| Command::RenameDevice {
            friendly_name,
            new_name,
            reply,
        })
        .await
    }

    pub async fn remove_device(&self, friendly_name: impl Into<String>) -> Result<(), BridgeError> {
        let friendly_name = friendly_name.into();
        self.request(|reply| Command::RemoveDevice {
            friendly_name,
            reply,
        })
        .await
    }

    pub async fn request_device_list(&self) -> Result<(), BridgeError> {
        self.request(|reply| Command::RequestDeviceList { reply })
            .await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>, BridgeError> {
        self.request(|reply| Command::Devices { reply }).await
    }

    pub async fn summary(&self) -> Result<BridgeSummary, BridgeError> {
        self.request(|reply| Command::Summary { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bridge::JoinWindow;
    use crate::bridge::Outbound;
    use crate::registry::MemoryRegistry;
    use crate::telemetry::MemorySink;

    fn start() -> (EngineHandle, OutboundReceiver, tokio::task::JoinHandle<Bridge>) {
        let (engine, handle, outbound) = Engine::new(
            BridgeSettings::default(),
            Box::new(MemoryRegistry::new(Some(LocationId(1)))),
            Box::new(MemorySink::new()),
            EventBus::new(),
        );
        (handle, outbound, tokio::spawn(engine.run()))
    }

    fn message(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            retain: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_sequence_runs_after_delay() {
        let (handle, mut outbound, _task) = start();
        handle
            .deliver(message("zigbee2mqtt/bridge/state", r#"{"state":"online"}"#))
            .await
            .unwrap();

        // Nothing before the settle delay.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(outbound.try_recv().is_err());

        let Outbound { topic, payload } = outbound.recv().await.unwrap();
        assert_eq!(topic, "zigbee2mqtt/bridge/config/permit_join");
        assert_eq!(payload, b"false");
        let next = outbound.recv().await.unwrap();
        assert_eq!(next.topic, "zigbee2mqtt/bridge/config/devices/get");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_before_settle_cancels() {
        let (handle, mut outbound, _task) = start();
        handle
            .deliver(message("zigbee2mqtt/bridge/state", "online"))
            .await
            .unwrap();
        handle
            .deliver(message("zigbee2mqtt/bridge/state", "offline"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commands_roundtrip() {
        let (handle, mut outbound, _task) = start();
        let id = handle.add_placeholder("porch_light", None).await.unwrap();

        handle.allow_joining(true, Some(id)).await.unwrap();
        let other = handle.add_placeholder("porch_sensor", None).await.unwrap();
        let err = handle.allow_joining(true, Some(other)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.join_window, JoinWindow::OpenSingle(id));
        assert_eq!(summary.devices, 2);

        assert_eq!(outbound.recv().await.unwrap().payload, b"true");
    }

    #[tokio::test]
    async fn test_run_returns_bridge_when_handles_drop() {
        let (handle, _outbound, task) = start();
        handle.add_placeholder("porch_light", None).await.unwrap();
        drop(handle);

        let bridge = task.await.unwrap();
        assert!(bridge.registry().find_by_name("porch_light").is_some());
    }
}
