//! Synchronisation with a zigbee2mqtt bridge.
//!
//! [`Bridge`] owns the device registry, the join window and the bridge
//! connection state. It is driven one input at a time: an MQTT message
//! through [`Bridge::handle_message`], a timer expiry through
//! [`Bridge::handle_timer`], or an operator command. Outbound commands go
//! to the [`Outbox`], notifications to the [`EventBus`].

mod join;
mod log_event;
mod monitor;
mod outbox;
mod payload;
mod reconcile;
mod router;
mod timer;
mod topics;

use std::collections::HashMap;
use std::time::Duration;

pub use join::JoinWindow;
pub use join::JoinWindowController;
pub use join::PairingCompletion;
pub use log_event::BridgeLog;
pub use log_event::LogEventInterpreter;
pub use monitor::BridgeStateMonitor;
pub use monitor::Transition;
pub use outbox::Outbound;
pub use outbox::OutboundReceiver;
pub use outbox::Outbox;
pub use payload::parse_bridge_state;
pub use payload::BridgeConnection;
pub use payload::DeviceDescriptor;
pub use payload::NodeType;
pub use reconcile::DeviceListReconciler;
pub use reconcile::ReconcileReport;
pub use router::fingerprint;
pub use router::MessageRouter;
pub use router::Routed;
pub use timer::ManualScheduler;
pub use timer::Scheduler;
pub use timer::Timer;
pub use timer::TimerKind;
pub use topics::Inbound;
pub use topics::Topics;
pub use topics::DEFAULT_BASE_TOPIC;

use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::BridgeError;
use crate::event::BridgeEvent;
use crate::event::EventBus;
use crate::registry::DeviceId;
use crate::registry::DeviceRecord;
use crate::registry::DeviceRegistry;
use crate::registry::LocationId;
use crate::registry::NewDevice;
use crate::registry::RegistryLink;
use crate::telemetry::TelemetryPolicy;
use crate::telemetry::TelemetrySink;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_PAIRING_TIMEOUT: Duration = Duration::from_secs(60);

/// Behaviour knobs for a [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub topics: Topics,
    /// Create records for hardware the registry has never seen.
    pub auto_create_devices: bool,
    /// Location for created records. Falls back to the registry's main
    /// location.
    pub default_location: Option<LocationId>,
    /// Wait after the bridge comes online before closing the join window
    /// and asking for the device list.
    pub settle_delay: Duration,
    /// How long a discover session may wait for its device.
    pub pairing_timeout: Duration,
    /// Telemetry policy by friendly name. Devices not listed use the
    /// default policy. An entry moves with its device when the bridge
    /// confirms a rename.
    pub telemetry: HashMap<String, TelemetryPolicy>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            auto_create_devices: true,
            default_location: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            pairing_timeout: DEFAULT_PAIRING_TIMEOUT,
            telemetry: HashMap::new(),
        }
    }
}

/// External services a [`Bridge`] works against.
pub struct Collaborators {
    pub registry: Box<dyn DeviceRegistry>,
    pub sink: Box<dyn TelemetrySink>,
    pub scheduler: Box<dyn Scheduler>,
    pub events: EventBus,
}

/// Point-in-time view of the bridge for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSummary {
    pub state: Option<BridgeConnection>,
    pub join_window: JoinWindow,
    pub pending_device: Option<DeviceId>,
    pub devices: usize,
}

pub struct Bridge {
    settings: BridgeSettings,
    registry: Box<dyn DeviceRegistry>,
    sink: Box<dyn TelemetrySink>,
    scheduler: Box<dyn Scheduler>,
    events: EventBus,
    outbox: Outbox,
    monitor: BridgeStateMonitor,
    join: JoinWindowController,
    /// Names the bridge still uses for bound placeholders, until it
    /// confirms the rename to the record's name.
    aliases: HashMap<String, DeviceId>,
}

impl Bridge {
    /// Returns the bridge and the receiving end of its outbox, which the
    /// transport must drain.
    pub fn new(settings: BridgeSettings, collaborators: Collaborators) -> (Self, OutboundReceiver) {
        let (outbox, outbound) = Outbox::new(settings.topics.clone());
        let bridge = Self {
            registry: collaborators.registry,
            sink: collaborators.sink,
            scheduler: collaborators.scheduler,
            events: collaborators.events,
            join: JoinWindowController::new(outbox.clone()),
            monitor: BridgeStateMonitor::new(),
            aliases: HashMap::new(),
            outbox,
            settings,
        };
        (bridge, outbound)
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn topics(&self) -> &Topics {
        &self.settings.topics
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.registry.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> Option<BridgeConnection> {
        self.monitor.state()
    }

    pub fn join_window(&self) -> JoinWindow {
        self.join.window()
    }

    pub fn pending_device(&self) -> Option<DeviceId> {
        self.join.pending()
    }

    pub fn summary(&self) -> BridgeSummary {
        BridgeSummary {
            state: self.monitor.state(),
            join_window: self.join.window(),
            pending_device: self.join.pending(),
            devices: self.registry.devices().len(),
        }
    }

    /// Snapshot of every record, ordered by id.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.devices().into_iter().cloned().collect()
    }

    /// Handle one inbound message.
    ///
    /// Errors describe why the message was dropped; the bridge state is
    /// consistent either way.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        let Some(inbound) = self.settings.topics.classify(topic) else {
            debug!("Ignoring message on foreign topic {}", topic);
            return Ok(());
        };

        match inbound {
            Inbound::BridgeState => {
                let state = parse_bridge_state(payload)
                    .map_err(|e| BridgeError::validation(topic, e))?;
                self.report_state(state);
                Ok(())
            }
            Inbound::DeviceList => {
                let report = DeviceListReconciler::new(
                    self.registry.as_mut(),
                    self.settings.auto_create_devices,
                    self.settings.default_location,
                )
                .reconcile(topic, payload)?;
                for (id, bridge_name) in report.bound {
                    self.claim_bridge_name(id, bridge_name);
                }
                Ok(())
            }
            Inbound::Log => {
                let event = BridgeLog::parse(topic, payload)?;
                let renamed = match &event {
                    BridgeLog::DeviceRenamed { from, to } => Some((from.clone(), to.clone())),
                    _ => None,
                };
                let timeout_armed = self.join.timeout_armed();
                let result = LogEventInterpreter {
                    registry: self.registry.as_mut(),
                    join: &mut self.join,
                    outbox: &self.outbox,
                    events: &self.events,
                }
                .interpret(event);
                if timeout_armed && !self.join.timeout_armed() {
                    self.scheduler.cancel(TimerKind::PairingTimeout);
                }
                if let (Ok(()), Some((from, to))) = (&result, renamed) {
                    self.follow_rename(&from, &to);
                }
                result
            }
            Inbound::OtherBridge => Ok(()),
            Inbound::Device(name) => {
                if !self.monitor.is_online() {
                    debug!("Bridge not online, dropping message for {}", name);
                    return Ok(());
                }
                let name = self.resolve_alias(name);
                MessageRouter {
                    registry: self.registry.as_mut(),
                    sink: self.sink.as_mut(),
                    policies: &self.settings.telemetry,
                    events: &self.events,
                }
                .route(topic, &name, payload)?;
                Ok(())
            }
        }
    }

    /// A bound placeholder keeps its name; ask the bridge to use it too and
    /// accept the bridge's name for the record in the meantime.
    fn claim_bridge_name(&mut self, id: DeviceId, bridge_name: String) {
        let Some(record) = self.registry.get(id) else {
            return;
        };
        let name = record.friendly_name().to_string();
        info!("Asking bridge to rename {} to {}", bridge_name, name);
        self.outbox.rename_device(&bridge_name, &name);
        self.aliases.insert(bridge_name, id);
    }

    fn resolve_alias(&self, name: &str) -> String {
        if self.registry.find_by_name(name).is_none() {
            let record = self.aliases.get(name).and_then(|id| self.registry.get(*id));
            if let Some(record) = record {
                return record.friendly_name().to_string();
            }
        }
        name.to_string()
    }

    /// Keep per-device settings attached to a device the bridge renamed.
    fn follow_rename(&mut self, from: &str, to: &str) {
        self.aliases.remove(from);
        if self.registry.find_by_name(to).is_none() {
            return;
        }
        if let Some(policy) = self.settings.telemetry.remove(from) {
            debug!("Telemetry policy follows {} to {}", from, to);
            self.settings.telemetry.insert(to.to_string(), policy);
        }
    }

    fn report_state(&mut self, state: BridgeConnection) {
        match self.monitor.report(state) {
            Transition::Online(timer) => {
                self.scheduler.schedule(timer, self.settings.settle_delay);
            }
            Transition::Offline { cancelled } => {
                if cancelled {
                    debug!("Bridge went offline before settling");
                    self.scheduler.cancel(TimerKind::Settle);
                }
            }
            Transition::Unchanged => {
                debug!("Bridge still {:?}", state);
                return;
            }
        }
        self.events.emit(BridgeEvent::BridgeStateChanged { state });
    }

    /// Handle a timer expiry delivered by the scheduler. Stale expiries are
    /// ignored.
    pub fn handle_timer(&mut self, timer: Timer) {
        match timer.kind {
            TimerKind::Settle => {
                if !self.monitor.settle_elapsed(timer) {
                    debug!("Ignoring stale settle timer");
                    return;
                }
                self.join.block_joining();
                self.outbox.query_device_list();
            }
            TimerKind::PairingTimeout => {
                if !self.join.timeout_elapsed(timer) {
                    debug!("Ignoring stale pairing timeout");
                    return;
                }
                self.outbox.query_device_list();
            }
        }
    }

    /// Open the join window. See [`JoinWindowController::allow_joining`].
    pub fn allow_joining(
        &mut self,
        limit_to_one: bool,
        device: Option<DeviceId>,
    ) -> Result<(), BridgeError> {
        self.join.allow_joining(limit_to_one, device)
    }

    pub fn block_joining(&mut self) {
        self.join.block_joining();
    }

    /// Let exactly one device pair for `device`, giving up after the
    /// pairing timeout.
    pub fn discover(&mut self, device: DeviceId) -> Result<(), BridgeError> {
        if self.registry.get(device).is_none() {
            return Err(BridgeError::Lookup(device.to_string()));
        }
        self.join.allow_joining(true, Some(device))?;
        let timer = self.join.arm_timeout();
        self.scheduler.schedule(timer, self.settings.pairing_timeout);
        Ok(())
    }

    /// Create an unlinked record for hardware that has yet to pair.
    pub fn add_placeholder(
        &mut self,
        friendly_name: &str,
        location: Option<LocationId>,
    ) -> Result<DeviceId, BridgeError> {
        let location = location
            .or(self.settings.default_location)
            .or_else(|| self.registry.main_location())
            .ok_or_else(|| BridgeError::Config(format!("no location for {}", friendly_name)))?;
        let id = self.registry.create(NewDevice {
            friendly_name: friendly_name.to_string(),
            location,
            link: RegistryLink::Placeholder,
        })?;
        info!("Added placeholder {} for {}", id, friendly_name);
        Ok(id)
    }

    /// Ask the bridge to rename a device. Spaces in `new_name` become
    /// underscores.
    ///
    /// Returns false without publishing if the device is unknown or the
    /// name is taken. The local record follows once the bridge confirms.
    pub fn rename_device(&mut self, friendly_name: &str, new_name: &str) -> bool {
        let new_name = new_name.trim().replace(' ', "_");
        let Some(id) = self.registry.find_by_name(friendly_name) else {
            warn!("Cannot rename {}: {}", friendly_name, BridgeError::Lookup(friendly_name.to_string()));
            return false;
        };
        if new_name.is_empty() {
            warn!("Cannot rename {} to an empty name", friendly_name);
            return false;
        }
        if let Some(other) = self.registry.find_by_name(&new_name) {
            if other != id {
                let e = BridgeError::Conflict(format!("'{}' is used by device {}", new_name, other));
                warn!("Cannot rename {}: {}", friendly_name, e);
                return false;
            }
        }
        self.outbox.rename_device(friendly_name, &new_name);
        true
    }

    /// Ask the bridge to remove a device. The record goes once the bridge
    /// confirms.
    pub fn remove_device(&mut self, friendly_name: &str) {
        self.outbox.remove_device(friendly_name);
    }

    pub fn request_device_list(&mut self) {
        self.outbox.query_device_list();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::telemetry::MemorySink;

    struct Fixture {
        bridge: Bridge,
        outbound: OutboundReceiver,
        scheduler: ManualScheduler,
    }

    fn fixture() -> Fixture {
        let scheduler = ManualScheduler::new();
        let (bridge, outbound) = Bridge::new(
            BridgeSettings::default(),
            Collaborators {
                registry: Box::new(MemoryRegistry::new(Some(LocationId(1)))),
                sink: Box::new(MemorySink::new()),
                scheduler: Box::new(scheduler.clone()),
                events: EventBus::new(),
            },
        );
        Fixture {
            bridge,
            outbound,
            scheduler,
        }
    }

    fn published(rx: &mut OutboundReceiver) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(format!("{} {}", msg.topic, msg.payload_str()));
        }
        out
    }

    #[test]
    fn test_online_schedules_settle() {
        let mut f = fixture();
        f.bridge
            .handle_message("zigbee2mqtt/bridge/state", br#"{"state":"online"}"#)
            .unwrap();

        let pending = f.scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.kind, TimerKind::Settle);
        assert_eq!(pending[0].1, DEFAULT_SETTLE_DELAY);
        assert!(published(&mut f.outbound).is_empty());

        let timer = f.scheduler.take(TimerKind::Settle).unwrap();
        f.bridge.handle_timer(timer);
        assert_eq!(
            published(&mut f.outbound),
            vec![
                "zigbee2mqtt/bridge/config/permit_join false",
                "zigbee2mqtt/bridge/config/devices/get ",
            ]
        );
    }

    #[test]
    fn test_offline_cancels_settle() {
        let mut f = fixture();
        f.bridge
            .handle_message("zigbee2mqtt/bridge/state", b"online")
            .unwrap();
        let timer = f.scheduler.pending()[0].0;
        f.bridge
            .handle_message("zigbee2mqtt/bridge/state", b"offline")
            .unwrap();

        assert!(f.scheduler.pending().is_empty());
        // An expiry already in flight changes nothing.
        f.bridge.handle_timer(timer);
        assert!(published(&mut f.outbound).is_empty());
    }

    #[test]
    fn test_invalid_state_payload() {
        let mut f = fixture();
        let err = f
            .bridge
            .handle_message("zigbee2mqtt/bridge/state", b"{\"state\": 3}")
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        assert_eq!(f.bridge.state(), None);
    }

    #[test]
    fn test_device_message_needs_online_bridge() {
        let mut f = fixture();
        f.bridge.add_placeholder("kitchen_sensor", None).unwrap();
        // Offline: dropped silently, even for known devices.
        f.bridge
            .handle_message("zigbee2mqtt/kitchen_sensor", br#"{"temperature":20}"#)
            .unwrap();
        let id = f.bridge.registry().find_by_name("kitchen_sensor").unwrap();
        assert!(f.bridge.registry().get(id).unwrap().params.is_empty());
    }

    #[test]
    fn test_rename_normalizes_spaces() {
        let mut f = fixture();
        f.bridge.add_placeholder("kitchen_sensor", None).unwrap();
        assert!(f.bridge.rename_device("kitchen_sensor", "living room"));
        assert_eq!(
            published(&mut f.outbound),
            vec![r#"zigbee2mqtt/bridge/config/rename {"new":"living_room","old":"kitchen_sensor"}"#]
        );
        // Unchanged until the bridge confirms.
        assert!(f.bridge.registry().find_by_name("kitchen_sensor").is_some());
    }

    #[test]
    fn test_rename_collision_returns_false() {
        let mut f = fixture();
        f.bridge.add_placeholder("a", None).unwrap();
        f.bridge.add_placeholder("b", None).unwrap();
        assert!(!f.bridge.rename_device("a", "b"));
        assert!(!f.bridge.rename_device("ghost", "c"));
        assert!(published(&mut f.outbound).is_empty());
    }

    #[test]
    fn test_discover_timeout() {
        let mut f = fixture();
        let id = f.bridge.add_placeholder("new_device", None).unwrap();
        f.bridge.discover(id).unwrap();
        assert_eq!(f.bridge.join_window(), JoinWindow::OpenSingle(id));

        let (timer, after) = f.scheduler.pending()[0];
        assert_eq!(after, DEFAULT_PAIRING_TIMEOUT);
        f.bridge.handle_timer(timer);

        assert_eq!(f.bridge.pending_device(), None);
        assert_eq!(f.bridge.join_window(), JoinWindow::Closed);
        assert_eq!(
            published(&mut f.outbound),
            vec![
                "zigbee2mqtt/bridge/config/permit_join true",
                "zigbee2mqtt/bridge/config/permit_join false",
                "zigbee2mqtt/bridge/config/devices/get ",
            ]
        );
    }

    #[test]
    fn test_pairing_success_cancels_timeout() {
        let mut f = fixture();
        let id = f.bridge.add_placeholder("new_device", None).unwrap();
        f.bridge.discover(id).unwrap();
        f.bridge
            .handle_message(
                "zigbee2mqtt/bridge/log",
                br#"{"type":"pairing","message":"interview_successful","meta":{"friendly_name":"new_device"}}"#,
            )
            .unwrap();

        assert!(f.scheduler.pending().is_empty());
        assert_eq!(f.bridge.pending_device(), None);
    }

    #[test]
    fn test_discover_unknown_device() {
        let mut f = fixture();
        let err = f.bridge.discover(DeviceId(42)).unwrap_err();
        assert!(matches!(err, BridgeError::Lookup(_)));
        assert!(f.scheduler.pending().is_empty());
    }

    #[test]
    fn test_foreign_and_other_bridge_topics_ignored() {
        let mut f = fixture();
        f.bridge.handle_message("other/thing", b"x").unwrap();
        f.bridge
            .handle_message("zigbee2mqtt/bridge/config/permit_join", b"true")
            .unwrap();
        assert_eq!(f.bridge.summary().devices, 0);
    }
}
