use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Deserialize;
use strum::Display;
use strum::EnumString;
use tracing::info;

use crate::registry::DeviceId;
use crate::registry::LocationId;

/// Payload keys that are stored as telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TelemetryMetric {
    Temperature,
    Humidity,
    Pressure,
    Illuminance,
    Co2,
    Voc,
    Noise,
    Dewpoint,
    Power,
    Energy,
    Voltage,
    Current,
    /// Only stored for devices that opt in.
    Battery,
}

impl TelemetryMetric {
    pub fn from_key(key: &str) -> Option<Self> {
        Self::from_str(key).ok()
    }

    /// Whether the metric is stored without an explicit opt-in.
    pub fn stored_by_default(self) -> bool {
        !matches!(self, TelemetryMetric::Battery)
    }
}

/// One stored measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub device: DeviceId,
    pub location: LocationId,
    pub metric: TelemetryMetric,
    pub value: f64,
    pub timestamp: SystemTime,
}

/// Per-device telemetry storage policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPolicy {
    pub store: bool,
    pub excluded: HashSet<TelemetryMetric>,
    pub included: HashSet<TelemetryMetric>,
}

impl Default for TelemetryPolicy {
    fn default() -> Self {
        Self {
            store: true,
            excluded: HashSet::new(),
            included: HashSet::new(),
        }
    }
}

impl TelemetryPolicy {
    pub fn allows(&self, metric: TelemetryMetric) -> bool {
        if !self.store || self.excluded.contains(&metric) {
            return false;
        }
        metric.stored_by_default() || self.included.contains(&metric)
    }
}

/// Destination for telemetry samples.
pub trait TelemetrySink: Send {
    fn store(&mut self, sample: TelemetrySample);
}

/// Sink that writes every sample to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn store(&mut self, sample: TelemetrySample) {
        info!(
            target: "zigbridge::telemetry",
            device = %sample.device,
            location = %sample.location,
            metric = %sample.metric,
            value = sample.value,
            "telemetry"
        );
    }
}

/// Sink that keeps samples in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<TelemetrySample>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<TelemetrySample> {
        self.samples
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn store(&mut self, sample: TelemetrySample) {
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(sample);
        }
    }
}
