/// Default bridge namespace.
pub const DEFAULT_BASE_TOPIC: &str = "zigbee2mqtt";

const QUERY_DEVICE_LIST: &str = "bridge/config/devices/get";
const PERMIT_JOIN: &str = "bridge/config/permit_join";
const REMOVE_DEVICE: &str = "bridge/config/remove";
const FORCE_REMOVE_DEVICE: &str = "bridge/config/force_remove";
const RENAME_DEVICE: &str = "bridge/config/rename";

const BRIDGE_STATE: &str = "bridge/state";
const DEVICES_CONFIG: &str = "bridge/config/devices";
const DEVICES: &str = "bridge/devices";
const BRIDGE_LOG: &str = "bridge/log";

/// Per-device sub-topics that carry commands or availability rather than
/// device state.
const DEVICE_SUFFIXES: &[&str] = &["set", "get", "availability"];

/// Inbound message kinds, by topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    BridgeState,
    DeviceList,
    Log,
    /// Any other `bridge/...` topic, including our own commands echoed back.
    OtherBridge,
    /// State of one device, keyed by friendly name.
    Device(&'a str),
}

/// Topic names under one bridge namespace.
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOPIC)
    }
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Wildcard covering everything the bridge publishes.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.base)
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base, suffix)
    }

    pub fn query_device_list(&self) -> String {
        self.topic(QUERY_DEVICE_LIST)
    }

    pub fn permit_join(&self) -> String {
        self.topic(PERMIT_JOIN)
    }

    pub fn remove_device(&self) -> String {
        self.topic(REMOVE_DEVICE)
    }

    pub fn force_remove_device(&self) -> String {
        self.topic(FORCE_REMOVE_DEVICE)
    }

    pub fn rename_device(&self) -> String {
        self.topic(RENAME_DEVICE)
    }

    /// Classify an inbound topic. Returns `None` outside the namespace.
    pub fn classify<'a>(&self, topic: &'a str) -> Option<Inbound<'a>> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;

        match rest {
            BRIDGE_STATE => return Some(Inbound::BridgeState),
            DEVICES | DEVICES_CONFIG => return Some(Inbound::DeviceList),
            BRIDGE_LOG => return Some(Inbound::Log),
            _ => {}
        }
        if rest == "bridge" || rest.starts_with("bridge/") {
            return Some(Inbound::OtherBridge);
        }

        let name = rest.rsplit('/').next()?;
        if name.is_empty() || DEVICE_SUFFIXES.contains(&name) {
            return Some(Inbound::OtherBridge);
        }
        Some(Inbound::Device(name))
    }
}
