//! Configuration file parsing and structures.
//!
//! zigbridge reads a single TOML file. Every section is optional; a missing
//! section takes its defaults.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::bridge::BridgeSettings;
use crate::bridge::Topics;
use crate::bridge::DEFAULT_BASE_TOPIC;
use crate::registry::LocationId;
use crate::telemetry::TelemetryMetric;
use crate::telemetry::TelemetryPolicy;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Per-device settings, keyed by friendly name
    #[serde(default)]
    pub devices: HashMap<String, DeviceConfig>,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Levels for individual targets, e.g. `"zigbridge::telemetry" = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter. `level` replaces the configured default
    /// level when given; overrides still apply.
    pub fn targets(&self, level: Option<LogLevel>) -> Targets {
        let default = level.unwrap_or(self.level);
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(default)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        )
    }
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "zigbridge".to_string()
}

fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

/// Broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Namespace the bridge publishes under
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            base_topic: default_base_topic(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_pairing_timeout_secs() -> u64 {
    60
}

fn default_service_unit() -> String {
    "zigbee2mqtt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Create a record for every unknown device the bridge reports
    #[serde(default = "default_true")]
    pub auto_create_devices: bool,

    /// Location new records are created in
    #[serde(default)]
    pub default_location: Option<u32>,

    /// Main location of the in-process registry, used when no default is set
    #[serde(default)]
    pub main_location: Option<u32>,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    /// Start the bridge daemon on boot and stop it on shutdown
    #[serde(default)]
    pub manage_service: bool,

    #[serde(default = "default_service_unit")]
    pub service_unit: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auto_create_devices: true,
            default_location: None,
            main_location: None,
            settle_delay_ms: default_settle_delay_ms(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            manage_service: false,
            service_unit: default_service_unit(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

/// HTTP API
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
            port: default_api_port(),
        }
    }
}

/// Telemetry settings of one device
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[serde(default = "default_true")]
    pub store_telemetry: bool,

    #[serde(default)]
    pub excluded_telemetry: Vec<TelemetryMetric>,

    /// Metrics that are not stored unless asked for, e.g. battery
    #[serde(default)]
    pub included_telemetry: Vec<TelemetryMetric>,
}

impl From<&DeviceConfig> for TelemetryPolicy {
    fn from(device: &DeviceConfig) -> Self {
        TelemetryPolicy {
            store: device.store_telemetry,
            excluded: device.excluded_telemetry.iter().copied().collect(),
            included: device.included_telemetry.iter().copied().collect(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|source| ConfigError::Io {
                path: path.as_ref().to_path_buf(),
                source,
            })?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the types alone do not rule out.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must not be 0".to_string()));
        }
        if self.api.enabled && self.api.port == 0 {
            return Err(ConfigError::Invalid("api.port must not be 0".to_string()));
        }
        if self.mqtt.base_topic.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.base_topic must not be empty".to_string(),
            ));
        }
        if self.bridge.manage_service && self.bridge.service_unit.is_empty() {
            return Err(ConfigError::Invalid(
                "bridge.service_unit must be set when manage_service is on".to_string(),
            ));
        }

        for (name, device) in &self.devices {
            let excluded: HashSet<_> = device.excluded_telemetry.iter().collect();
            if let Some(metric) = device
                .included_telemetry
                .iter()
                .find(|m| excluded.contains(m))
            {
                return Err(ConfigError::Invalid(format!(
                    "devices.{}: {} is both included and excluded",
                    name, metric
                )));
            }
        }
        Ok(())
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            topics: Topics::new(self.mqtt.base_topic.clone()),
            auto_create_devices: self.bridge.auto_create_devices,
            default_location: self.bridge.default_location.map(LocationId),
            settle_delay: Duration::from_millis(self.bridge.settle_delay_ms),
            pairing_timeout: Duration::from_secs(self.bridge.pairing_timeout_secs),
            telemetry: self
                .devices
                .iter()
                .map(|(name, device)| (name.clone(), TelemetryPolicy::from(device)))
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.mqtt.base_topic, "zigbee2mqtt");
        assert_eq!(config.api.port, 8565);
        assert!(config.bridge.auto_create_devices);

        let settings = config.bridge_settings();
        assert_eq!(settings.settle_delay, Duration::from_millis(1000));
        assert_eq!(settings.pairing_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [logging]
            level = "debug"
            overrides."zigbridge::telemetry" = "warn"

            [mqtt]
            broker = "mqtt.lan"
            port = 1884
            base_topic = "z2m"
            username = "bridge"
            password = "secret"

            [bridge]
            auto_create_devices = false
            default_location = 4
            settle_delay_ms = 250
            manage_service = true

            [api]
            listen = "0.0.0.0"

            [devices.kitchen_sensor]
            excluded_telemetry = ["humidity"]
            included_telemetry = ["battery"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.logging.overrides["zigbridge::telemetry"], LogLevel::Warn);
        assert_eq!(config.mqtt.port, 1884);

        let settings = config.bridge_settings();
        assert_eq!(settings.topics.base(), "z2m");
        assert!(!settings.auto_create_devices);
        assert_eq!(settings.default_location, Some(LocationId(4)));
        let policy = &settings.telemetry["kitchen_sensor"];
        assert!(policy.allows(TelemetryMetric::Battery));
        assert!(!policy.allows(TelemetryMetric::Humidity));
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let toml = r#"
            [devices.plug]
            excluded_telemetry = ["wattage"]
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_overlapping_metrics_invalid() {
        let toml = r#"
            [devices.plug]
            excluded_telemetry = ["power"]
            included_telemetry = ["power"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_empty_base_topic_invalid() {
        let config: Config = toml::from_str("[mqtt]\nbase_topic = \"/\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_invalid() {
        let config: Config = toml::from_str("[api]\nport = 0").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[api]\nenabled = false\nport = 0").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt]\nbroker = \"mqtt.lan\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mqtt.broker, "mqtt.lan");
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/zigbridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err
            .to_string()
            .starts_with("Failed to read config file /nonexistent/zigbridge.toml: "));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mqtt\nbroker = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse TOML: "));
    }

    #[test]
    fn test_cli_level_replaces_default() {
        let logging = LoggingConfig {
            level: LogLevel::Warn,
            overrides: HashMap::new(),
        };
        let targets = logging.targets(Some(LogLevel::Trace));
        assert!(targets.would_enable("zigbridge::bridge", &tracing::Level::TRACE));

        let targets = logging.targets(None);
        assert!(!targets.would_enable("zigbridge::bridge", &tracing::Level::INFO));
    }
}
