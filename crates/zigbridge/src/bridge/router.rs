use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::time::SystemTime;

use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use crate::classify::handler_for;
use crate::error::BridgeError;
use crate::event::BridgeEvent;
use crate::event::EventBus;
use crate::registry::DeviceRegistry;
use crate::telemetry::TelemetryMetric;
use crate::telemetry::TelemetryPolicy;
use crate::telemetry::TelemetrySample;
use crate::telemetry::TelemetrySink;

/// What happened to a device payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Applied to the device; `samples` telemetry samples were stored.
    Dispatched { samples: usize },
    /// Identical to the previous payload for this device.
    Duplicate,
}

/// Fingerprint of a raw payload, used to drop repeated deliveries.
pub fn fingerprint(payload: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Dispatches per-device state messages.
pub struct MessageRouter<'a> {
    pub registry: &'a mut dyn DeviceRegistry,
    pub sink: &'a mut dyn TelemetrySink,
    pub policies: &'a HashMap<String, TelemetryPolicy>,
    pub events: &'a EventBus,
}

impl MessageRouter<'_> {
    /// Route a payload for the device called `friendly_name`.
    ///
    /// The bridge must already be known to be online; that check belongs
    /// to the caller.
    pub fn route(
        &mut self,
        topic: &str,
        friendly_name: &str,
        payload: &[u8],
    ) -> Result<Routed, BridgeError> {
        let id = self
            .registry
            .find_by_name(friendly_name)
            .ok_or_else(|| BridgeError::Lookup(friendly_name.to_string()))?;
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::Lookup(friendly_name.to_string()))?;

        let print = fingerprint(payload);
        if record.last_fingerprint == Some(print) {
            debug!("Dropping duplicate payload for {}", friendly_name);
            return Ok(Routed::Duplicate);
        }

        let fields: Map<String, Value> = match serde_json::from_slice(payload) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err(BridgeError::validation(topic, "payload is not an object")),
            Err(e) => return Err(BridgeError::validation(topic, e.to_string())),
        };
        record.last_fingerprint = Some(print);

        handler_for(record.classification.category()).apply(&mut record.status, &fields);
        for (key, value) in &fields {
            record.params.insert(key.clone(), value.clone());
        }

        let default_policy = TelemetryPolicy::default();
        let policy = self.policies.get(friendly_name).unwrap_or(&default_policy);
        let timestamp = SystemTime::now();
        let mut samples = 0;
        for (key, value) in &fields {
            let Some(metric) = TelemetryMetric::from_key(key) else {
                continue;
            };
            let Some(value) = value.as_f64() else {
                debug!("Non-numeric {} from {}: {}", metric, friendly_name, value);
                continue;
            };
            if !policy.allows(metric) {
                continue;
            }
            self.sink.store(TelemetrySample {
                device: id,
                location: record.location,
                metric,
                value,
                timestamp,
            });
            samples += 1;
        }

        self.events.emit(BridgeEvent::Heartbeat { device: id });
        Ok(Routed::Dispatched { samples })
    }
}
