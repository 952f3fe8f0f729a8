use std::collections::HashMap;

use serde_json::json;
use zigbridge::bridge::JoinWindow;
use zigbridge::bridge::ManualScheduler;
use zigbridge::bridge::OutboundReceiver;
use zigbridge::bridge::TimerKind;
use zigbridge::classify::Category;
use zigbridge::registry::IeeeAddr;
use zigbridge::registry::LocationId;
use zigbridge::registry::MemoryRegistry;
use zigbridge::telemetry::MemorySink;
use zigbridge::telemetry::TelemetryMetric;
use zigbridge::telemetry::TelemetryPolicy;
use zigbridge::Bridge;
use zigbridge::BridgeError;
use zigbridge::BridgeEvent;
use zigbridge::BridgeSettings;
use zigbridge::Collaborators;
use zigbridge::EventBus;

const STATE: &str = "zigbee2mqtt/bridge/state";
const DEVICES: &str = "zigbee2mqtt/bridge/devices";
const LOG: &str = "zigbee2mqtt/bridge/log";

struct Harness {
    bridge: Bridge,
    outbound: OutboundReceiver,
    scheduler: ManualScheduler,
    sink: MemorySink,
    events: EventBus,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(BridgeSettings::default())
    }

    fn with_settings(settings: BridgeSettings) -> Self {
        let scheduler = ManualScheduler::new();
        let sink = MemorySink::new();
        let events = EventBus::new();
        let (bridge, outbound) = Bridge::new(
            settings,
            Collaborators {
                registry: Box::new(MemoryRegistry::new(Some(LocationId(1)))),
                sink: Box::new(sink.clone()),
                scheduler: Box::new(scheduler.clone()),
                events: events.clone(),
            },
        );
        Self {
            bridge,
            outbound,
            scheduler,
            sink,
            events,
        }
    }

    fn send(&mut self, topic: &str, payload: serde_json::Value) -> Result<(), BridgeError> {
        self.bridge
            .handle_message(topic, payload.to_string().as_bytes())
    }

    /// Bring the bridge online and let it settle.
    fn settle(&mut self) {
        self.send(STATE, json!({"state": "online"})).unwrap();
        let timer = self.scheduler.take(TimerKind::Settle).unwrap();
        self.bridge.handle_timer(timer);
    }

    fn published(&mut self) -> String {
        let mut lines = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            if msg.payload.is_empty() {
                lines.push(msg.topic);
            } else {
                lines.push(format!("{} {}", msg.topic, msg.payload_str()));
            }
        }
        lines.join("\n")
    }
}

fn kitchen_sensor() -> serde_json::Value {
    json!({
        "type": "EndDevice",
        "ieeeAddr": "0x1",
        "friendly_name": "kitchen_sensor",
        "definition": {"exposes": [
            {"type": "numeric", "property": "temperature"},
            {"type": "numeric", "property": "humidity"}
        ]}
    })
}

fn hall_light() -> serde_json::Value {
    json!({
        "type": "Router",
        "ieee_address": "0x2",
        "friendly_name": "hall_light",
        "definition": {"exposes": [
            {"type": "light", "features": [
                {"type": "binary", "property": "state"},
                {"type": "numeric", "property": "brightness"}
            ]},
            {"type": "numeric", "property": "linkquality"}
        ]}
    })
}

#[test]
fn test_online_closes_join_and_queries_devices() {
    let mut h = Harness::new();
    h.send(STATE, json!({"state": "online"})).unwrap();
    assert_eq!(h.published(), "");

    let timer = h.scheduler.take(TimerKind::Settle).unwrap();
    h.bridge.handle_timer(timer);

    insta::assert_snapshot!(h.published(), @r"
    zigbee2mqtt/bridge/config/permit_join false
    zigbee2mqtt/bridge/config/devices/get
    ");
}

#[test]
fn test_device_list_classifies_environment_sensor() {
    let mut h = Harness::new();
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor(), hall_light()]))
        .unwrap();

    let registry = h.bridge.registry();
    let sensor = registry.find_by_name("kitchen_sensor").unwrap();
    let light = registry.find_by_name("hall_light").unwrap();
    assert_eq!(
        registry.get(sensor).unwrap().classification.category(),
        Category::Environment
    );
    assert_eq!(
        registry.get(light).unwrap().classification.category(),
        Category::Light
    );
    assert_eq!(
        registry.get(sensor).unwrap().ieee,
        Some(IeeeAddr::new("0x1"))
    );
}

#[test]
fn test_rename_publishes_normalized_name() {
    let mut h = Harness::new();
    h.settle();
    h.published();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();

    assert!(h.bridge.rename_device("kitchen_sensor", "living room"));
    insta::assert_snapshot!(
        h.published(),
        @r#"zigbee2mqtt/bridge/config/rename {"new":"living_room","old":"kitchen_sensor"}"#
    );

    // The bridge confirms through its log.
    h.send(
        LOG,
        json!({"type": "device_renamed", "message": {"from": "kitchen_sensor", "to": "living_room"}}),
    )
    .unwrap();
    let registry = h.bridge.registry();
    assert!(registry.find_by_name("kitchen_sensor").is_none());
    assert!(registry.find_by_name("living_room").is_some());
}

#[test]
fn test_removed_log_deletes_record() {
    let mut h = Harness::new();
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();
    let mut events = h.events.subscribe();

    h.send(LOG, json!({"type": "device_removed", "message": "kitchen_sensor"}))
        .unwrap();

    assert!(h.bridge.registry().find_by_name("kitchen_sensor").is_none());
    assert!(matches!(
        events.try_recv().unwrap(),
        BridgeEvent::DeviceRemoved { friendly_name, .. } if friendly_name == "kitchen_sensor"
    ));
}

#[test]
fn test_second_single_device_session_conflicts() {
    let mut h = Harness::new();
    let a = h.bridge.add_placeholder("device_a", None).unwrap();
    let b = h.bridge.add_placeholder("device_b", None).unwrap();

    h.bridge.allow_joining(true, Some(a)).unwrap();
    let err = h.bridge.allow_joining(true, Some(b)).unwrap_err();

    assert!(matches!(err, BridgeError::Conflict(_)));
    assert_eq!(h.bridge.join_window(), JoinWindow::OpenSingle(a));
    assert_eq!(h.bridge.pending_device(), Some(a));
}

#[test]
fn test_telemetry_extracts_known_metrics() {
    let mut h = Harness::new();
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();

    h.send(
        "zigbee2mqtt/kitchen_sensor",
        json!({"temperature": 21, "humidity": 55, "linkquality": 80}),
    )
    .unwrap();

    let mut metrics: Vec<_> = h.sink.samples().iter().map(|s| (s.metric, s.value)).collect();
    metrics.sort_by_key(|(metric, _)| metric.to_string());
    assert_eq!(
        metrics,
        vec![
            (TelemetryMetric::Humidity, 55.0),
            (TelemetryMetric::Temperature, 21.0),
        ]
    );

    let id = h.bridge.registry().find_by_name("kitchen_sensor").unwrap();
    let record = h.bridge.registry().get(id).unwrap();
    assert_eq!(record.params["linkquality"], json!(80));
    assert_eq!(record.status.temperature, Some(21.0));
}

#[test]
fn test_repeated_payload_stored_once() {
    let mut h = Harness::new();
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();

    let payload = json!({"temperature": 21});
    for _ in 0..3 {
        h.send("zigbee2mqtt/kitchen_sensor", payload.clone()).unwrap();
    }
    assert_eq!(h.sink.samples().len(), 1);

    h.send("zigbee2mqtt/kitchen_sensor", json!({"temperature": 22}))
        .unwrap();
    assert_eq!(h.sink.samples().len(), 2);
}

#[test]
fn test_duplicates_tracked_per_device() {
    let mut h = Harness::new();
    h.settle();
    let other = json!({
        "type": "EndDevice",
        "ieeeAddr": "0x3",
        "friendly_name": "porch_sensor",
        "definition": {"exposes": [{"type": "numeric", "property": "temperature"}]}
    });
    h.send(DEVICES, json!([kitchen_sensor(), other])).unwrap();

    let payload = json!({"temperature": 18});
    h.send("zigbee2mqtt/kitchen_sensor", payload.clone()).unwrap();
    h.send("zigbee2mqtt/porch_sensor", payload).unwrap();

    assert_eq!(h.sink.samples().len(), 2);
}

#[test]
fn test_policy_exclusions_and_battery_opt_in() {
    let excluded = TelemetryPolicy {
        excluded: [TelemetryMetric::Humidity].into(),
        ..TelemetryPolicy::default()
    };
    let opted_in = TelemetryPolicy {
        included: [TelemetryMetric::Battery].into(),
        ..TelemetryPolicy::default()
    };
    let mut h = Harness::with_settings(BridgeSettings {
        telemetry: HashMap::from([
            ("kitchen_sensor".to_string(), excluded),
            ("hall_light".to_string(), opted_in),
        ]),
        ..BridgeSettings::default()
    });
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor(), hall_light()]))
        .unwrap();

    h.send(
        "zigbee2mqtt/kitchen_sensor",
        json!({"temperature": 20, "humidity": 40, "battery": 90}),
    )
    .unwrap();
    h.send("zigbee2mqtt/hall_light", json!({"state": "ON", "battery": 75}))
        .unwrap();

    let samples = h.sink.samples();
    let metrics: Vec<_> = samples.iter().map(|s| s.metric).collect();
    assert_eq!(metrics.len(), 2);
    assert!(metrics.contains(&TelemetryMetric::Temperature));
    assert!(metrics.contains(&TelemetryMetric::Battery));

    let light = h.bridge.registry().find_by_name("hall_light").unwrap();
    assert_eq!(h.bridge.registry().get(light).unwrap().status.on, Some(true));
}

fn front_door() -> serde_json::Value {
    json!({
        "type": "EndDevice",
        "ieeeAddr": "0x4",
        "friendly_name": "0x0000000000000004",
        "definition": {"exposes": [{"type": "lock", "features": [
            {"type": "binary", "property": "state"}
        ]}]}
    })
}

#[test]
fn test_placeholder_binds_to_paired_hardware() {
    let mut h = Harness::new();
    h.settle();
    let placeholder = h
        .bridge
        .add_placeholder("front_door", Some(LocationId(7)))
        .unwrap();
    h.bridge.discover(placeholder).unwrap();
    h.published();

    h.send(DEVICES, json!([front_door()])).unwrap();

    let record = h.bridge.registry().get(placeholder).unwrap();
    assert!(!record.is_placeholder());
    assert_eq!(record.friendly_name(), "front_door");
    assert_eq!(record.ieee, Some(IeeeAddr::new("0x4")));
    assert_eq!(record.location, LocationId(7));
    assert_eq!(record.classification.category(), Category::Lock);
    assert_eq!(h.bridge.summary().devices, 1);
    insta::assert_snapshot!(
        h.published(),
        @r#"zigbee2mqtt/bridge/config/rename {"new":"front_door","old":"0x0000000000000004"}"#
    );
}

#[test]
fn test_bound_placeholder_routed_under_bridge_name() {
    let mut h = Harness::new();
    h.settle();
    let placeholder = h.bridge.add_placeholder("front_door", None).unwrap();
    h.bridge.discover(placeholder).unwrap();
    h.send(DEVICES, json!([front_door()])).unwrap();

    // Until the bridge confirms the rename it still publishes under its own name.
    h.send("zigbee2mqtt/0x0000000000000004", json!({"temperature": 20}))
        .unwrap();
    assert_eq!(h.sink.samples().len(), 1);
    assert_eq!(h.sink.samples()[0].device, placeholder);

    h.send(
        LOG,
        json!({"type": "device_renamed", "message": {"from": "0x0000000000000004", "to": "front_door"}}),
    )
    .unwrap();
    h.send("zigbee2mqtt/front_door", json!({"temperature": 21}))
        .unwrap();
    assert_eq!(h.sink.samples().len(), 2);

    let err = h
        .send("zigbee2mqtt/0x0000000000000004", json!({"temperature": 22}))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Lookup(_)));
}

#[test]
fn test_policy_follows_confirmed_rename() {
    let excluded = TelemetryPolicy {
        excluded: [TelemetryMetric::Humidity].into(),
        ..TelemetryPolicy::default()
    };
    let mut h = Harness::with_settings(BridgeSettings {
        telemetry: HashMap::from([("kitchen_sensor".to_string(), excluded)]),
        ..BridgeSettings::default()
    });
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();

    assert!(h.bridge.rename_device("kitchen_sensor", "living_room"));
    h.send(
        LOG,
        json!({"type": "device_renamed", "message": {"from": "kitchen_sensor", "to": "living_room"}}),
    )
    .unwrap();
    h.send(
        "zigbee2mqtt/living_room",
        json!({"temperature": 20, "humidity": 40}),
    )
    .unwrap();

    let metrics: Vec<_> = h.sink.samples().iter().map(|s| s.metric).collect();
    assert_eq!(metrics, vec![TelemetryMetric::Temperature]);
    assert!(h.bridge.settings().telemetry.contains_key("living_room"));
    assert!(!h.bridge.settings().telemetry.contains_key("kitchen_sensor"));
}

#[test]
fn test_device_messages_ignored_until_online() {
    let mut h = Harness::new();
    h.settle();
    h.send(DEVICES, json!([kitchen_sensor()])).unwrap();
    h.send(STATE, json!({"state": "offline"})).unwrap();

    h.send("zigbee2mqtt/kitchen_sensor", json!({"temperature": 19}))
        .unwrap();
    assert!(h.sink.samples().is_empty());
}

#[test]
fn test_offline_before_settle_cancels_query() {
    let mut h = Harness::new();
    h.send(STATE, json!({"state": "online"})).unwrap();
    let stale = h.scheduler.pending()[0].0;
    h.send(STATE, json!({"state": "offline"})).unwrap();

    assert!(h.scheduler.pending().is_empty());
    h.bridge.handle_timer(stale);
    assert_eq!(h.published(), "");
}

#[test]
fn test_pairing_success_announces_device() {
    let mut h = Harness::new();
    h.settle();
    h.published();
    let id = h.bridge.add_placeholder("front_door", None).unwrap();
    h.bridge.discover(id).unwrap();
    let mut events = h.events.subscribe();

    // The bridge reports new hardware under its own name.
    h.send(
        LOG,
        json!({
            "type": "pairing",
            "message": "interview_successful",
            "meta": {"friendly_name": "0x0000000000000004"}
        }),
    )
    .unwrap();

    assert_eq!(h.bridge.pending_device(), None);
    assert_eq!(h.bridge.join_window(), JoinWindow::Closed);
    assert!(h.scheduler.pending().is_empty());
    assert_eq!(
        events.try_recv().unwrap(),
        BridgeEvent::DeviceAdded {
            device: id,
            friendly_name: "front_door".to_string()
        }
    );
    insta::assert_snapshot!(h.published(), @r"
    zigbee2mqtt/bridge/config/permit_join true
    zigbee2mqtt/bridge/config/permit_join false
    zigbee2mqtt/bridge/config/devices/get
    ");

    // The queried list binds the placeholder.
    h.send(DEVICES, json!([front_door()])).unwrap();
    assert_eq!(
        h.bridge.registry().find_by_hardware_id(&IeeeAddr::new("0x4")),
        Some(id)
    );
}
