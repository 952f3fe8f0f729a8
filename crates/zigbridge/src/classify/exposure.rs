use serde::Deserialize;
use serde::Serialize;

use super::capability::Capability;
use super::capability::CapabilitySet;
use super::capability::Category;

/// Top-level device classes the bridge reports as exposure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Light,
    Switch,
    Fan,
    Cover,
    Lock,
    Climate,
}

impl DeviceClass {
    fn capability(self) -> Capability {
        match self {
            DeviceClass::Light => Capability::Light,
            DeviceClass::Switch => Capability::Switch,
            DeviceClass::Fan => Capability::Fan,
            DeviceClass::Cover => Capability::Cover,
            DeviceClass::Lock => Capability::Lock,
            DeviceClass::Climate => Capability::Climate,
        }
    }
}

/// Value kinds of fine-grained exposures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Binary,
    Numeric,
    Enum,
    Text,
    Composite,
    List,
}

/// One exposure descriptor from a device definition.
///
/// The bridge sends e.g.
/// `{"type": "light", "features": [{"type": "binary", "property": "state"}]}`
/// or `{"type": "numeric", "property": "temperature", "unit": "°C"}`.
/// Extra fields are ignored; unknown types become [`Exposure::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawExposure", into = "RawExposure")]
pub enum Exposure {
    Class {
        class: DeviceClass,
        features: Vec<Exposure>,
    },
    Property {
        kind: ValueKind,
        property: String,
        features: Vec<Exposure>,
    },
    Unknown {
        kind: String,
        property: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawExposure {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    property: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    features: Vec<Exposure>,
}

impl From<RawExposure> for Exposure {
    fn from(raw: RawExposure) -> Self {
        let as_str = serde_json::Value::String(raw.kind.clone());
        if let Ok(class) = serde_json::from_value::<DeviceClass>(as_str.clone()) {
            return Exposure::Class {
                class,
                features: raw.features,
            };
        }
        match (serde_json::from_value::<ValueKind>(as_str), raw.property) {
            (Ok(kind), Some(property)) => Exposure::Property {
                kind,
                property,
                features: raw.features,
            },
            (_, property) => Exposure::Unknown {
                kind: raw.kind,
                property,
            },
        }
    }
}

impl From<Exposure> for RawExposure {
    fn from(exposure: Exposure) -> Self {
        match exposure {
            Exposure::Class { class, features } => RawExposure {
                kind: enum_name(&class),
                property: None,
                features,
            },
            Exposure::Property {
                kind,
                property,
                features,
            } => RawExposure {
                kind: enum_name(&kind),
                property: Some(property),
                features,
            },
            Exposure::Unknown { kind, property } => RawExposure {
                kind,
                property,
                features: Vec::new(),
            },
        }
    }
}

fn enum_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

impl Exposure {
    /// Capabilities named by this exposure and its nested features.
    pub fn capabilities(&self) -> CapabilitySet {
        let mut set = CapabilitySet::GENERIC;
        self.collect_into(&mut set);
        set
    }

    fn collect_into(&self, set: &mut CapabilitySet) {
        match self {
            Exposure::Class { class, features } => {
                set.insert(class.capability());
                features.iter().for_each(|f| f.collect_into(set));
            }
            Exposure::Property {
                property, features, ..
            } => {
                if let Some(capability) = Capability::from_name(property) {
                    set.insert(capability);
                }
                features.iter().for_each(|f| f.collect_into(set));
            }
            Exposure::Unknown { .. } => {}
        }
    }
}

/// Accumulated capabilities of one device with its cached category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Classification {
    capabilities: CapabilitySet,
    category: Category,
}

impl Classification {
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Add the capabilities named by `exposures`.
    ///
    /// Bits are only ever added. The category is recomputed only when the
    /// set changed. Returns whether it changed.
    pub fn absorb(&mut self, exposures: &[Exposure]) -> bool {
        let before = self.capabilities;
        for exposure in exposures {
            self.capabilities = self.capabilities.union(exposure.capabilities());
        }
        if self.capabilities == before {
            return false;
        }
        self.category = self.capabilities.simplify();
        true
    }
}
