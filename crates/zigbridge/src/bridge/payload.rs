//! Wire formats of inbound bridge payloads.

use serde::Deserialize;
use serde::Serialize;

use crate::classify::Exposure;
use crate::registry::IeeeAddr;

/// Bridge connectivity as reported on `bridge/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeConnection {
    Online,
    Offline,
}

#[derive(Deserialize)]
struct StateObject {
    state: BridgeConnection,
}

/// Parse a `bridge/state` payload.
///
/// Current bridges send `{"state": "online"}`, older ones the bare word.
pub fn parse_bridge_state(payload: &[u8]) -> Result<BridgeConnection, String> {
    if let Ok(object) = serde_json::from_slice::<StateObject>(payload) {
        return Ok(object.state);
    }
    let text = std::str::from_utf8(payload).map_err(|e| e.to_string())?;
    match text.trim().trim_matches('"') {
        "online" => Ok(BridgeConnection::Online),
        "offline" => Ok(BridgeConnection::Offline),
        other => Err(format!("unknown bridge state '{}'", other)),
    }
}

/// Node role of a device in the zigbee network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NodeType {
    Coordinator,
    Router,
    EndDevice,
    #[serde(other)]
    Unknown,
}

impl NodeType {
    /// Only routers and end devices are real, pairable hardware.
    pub fn is_device(self) -> bool {
        matches!(self, NodeType::Router | NodeType::EndDevice)
    }
}

/// One entry of the bridge's device list.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "type", default = "unknown_node")]
    pub node_type: NodeType,

    #[serde(rename = "ieeeAddr", alias = "ieee_address")]
    pub ieee: IeeeAddr,

    pub friendly_name: String,

    #[serde(default)]
    pub definition: Option<Definition>,
}

fn unknown_node() -> NodeType {
    NodeType::Unknown
}

#[derive(Debug, Clone, Deserialize)]
pub struct Definition {
    #[serde(default)]
    pub exposes: Option<Vec<Exposure>>,
}

impl DeviceDescriptor {
    pub fn exposes(&self) -> Option<&[Exposure]> {
        self.definition.as_ref()?.exposes.as_deref()
    }
}

/// A `bridge/log` event before interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct LogPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub message: serde_json::Value,

    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_state_forms() {
        assert_eq!(
            parse_bridge_state(br#"{"state":"online"}"#),
            Ok(BridgeConnection::Online)
        );
        assert_eq!(parse_bridge_state(b"offline"), Ok(BridgeConnection::Offline));
        assert!(parse_bridge_state(br#"{"state":"rebooting"}"#).is_err());
    }

    #[test]
    fn test_descriptor_field_aliases() {
        let old: DeviceDescriptor = serde_json::from_value(serde_json::json!({
            "type": "EndDevice",
            "ieeeAddr": "0x1",
            "friendly_name": "kitchen_sensor"
        }))
        .unwrap();
        let new: DeviceDescriptor = serde_json::from_value(serde_json::json!({
            "type": "Router",
            "ieee_address": "0x2",
            "friendly_name": "plug",
            "definition": {"exposes": [{"type": "switch"}]}
        }))
        .unwrap();

        assert_eq!(old.ieee, IeeeAddr::new("0x1"));
        assert!(old.exposes().is_none());
        assert_eq!(new.ieee, IeeeAddr::new("0x2"));
        assert_eq!(new.exposes().map(|e| e.len()), Some(1));
    }

    #[test]
    fn test_node_type_filter() {
        let coordinator: DeviceDescriptor = serde_json::from_value(serde_json::json!({
            "type": "Coordinator",
            "ieee_address": "0x0",
            "friendly_name": "Coordinator",
            "definition": null
        }))
        .unwrap();
        assert!(!coordinator.node_type.is_device());

        let greenpower: DeviceDescriptor = serde_json::from_value(serde_json::json!({
            "type": "GreenPower",
            "ieee_address": "0x5",
            "friendly_name": "gp"
        }))
        .unwrap();
        assert_eq!(greenpower.node_type, NodeType::Unknown);
    }
}
