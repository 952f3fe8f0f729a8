use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::classify::Classification;
use crate::classify::DeviceStatus;
use crate::classify::Exposure;

/// Registry-assigned record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u32);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zigbee IEEE address as reported by the bridge, e.g. `0x00124b001234abcd`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IeeeAddr(pub String);

impl IeeeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IeeeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a record is tied to hardware yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "ieee")]
pub enum RegistryLink {
    /// Created ahead of pairing; the next unmatched device binds to it.
    Placeholder,
    Bound(IeeeAddr),
}

/// Input to [`super::DeviceRegistry::create`].
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub friendly_name: String,
    pub location: LocationId,
    pub link: RegistryLink,
}

/// A device as known locally.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    id: DeviceId,
    friendly_name: String,
    link: RegistryLink,

    /// Hardware id persisted in the device's settings.
    pub ieee: Option<IeeeAddr>,

    pub location: LocationId,

    /// Exposure descriptors as last reported by the bridge.
    pub exposes: Vec<Exposure>,

    #[serde(flatten)]
    pub classification: Classification,

    pub status: DeviceStatus,

    /// Latest value of every payload key seen for this device.
    pub params: BTreeMap<String, serde_json::Value>,

    /// Fingerprint of the last payload routed to this device.
    #[serde(skip)]
    pub last_fingerprint: Option<u64>,
}

impl DeviceRecord {
    pub fn new(id: DeviceId, device: NewDevice) -> Self {
        let ieee = match &device.link {
            RegistryLink::Bound(ieee) => Some(ieee.clone()),
            RegistryLink::Placeholder => None,
        };
        Self {
            id,
            friendly_name: device.friendly_name,
            link: device.link,
            ieee,
            location: device.location,
            exposes: Vec::new(),
            classification: Classification::default(),
            status: DeviceStatus::default(),
            params: BTreeMap::new(),
            last_fingerprint: None,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn link(&self) -> &RegistryLink {
        &self.link
    }

    pub fn is_placeholder(&self) -> bool {
        self.link == RegistryLink::Placeholder
    }

    /// Only the registry renames records, so names stay unique.
    pub(crate) fn set_friendly_name(&mut self, name: String) {
        self.friendly_name = name;
    }

    pub(crate) fn set_link(&mut self, link: RegistryLink) {
        self.link = link;
    }
}
