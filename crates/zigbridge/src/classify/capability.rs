use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// A single capability a device can expose.
///
/// Names are the exposure class types and property names the bridge uses.
/// `contact` is an alias for `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Light,
    Switch,
    Fan,
    Cover,
    Lock,
    Climate,
    #[strum(to_string = "window", serialize = "contact")]
    Window,
    Temperature,
    Humidity,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::Light,
        Capability::Switch,
        Capability::Fan,
        Capability::Cover,
        Capability::Lock,
        Capability::Climate,
        Capability::Window,
        Capability::Temperature,
        Capability::Humidity,
    ];

    /// Look up a class or property name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }

    const fn bit(self) -> u16 {
        match self {
            Capability::Light => 1 << 0,
            Capability::Switch => 1 << 1,
            Capability::Fan => 1 << 2,
            Capability::Cover => 1 << 3,
            Capability::Lock => 1 << 4,
            Capability::Climate => 1 << 5,
            Capability::Window => 1 << 6,
            Capability::Temperature => 1 << 7,
            Capability::Humidity => 1 << 8,
        }
    }
}

/// Accumulated capability bits of a device. The empty set is `generic`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const GENERIC: CapabilitySet = CapabilitySet(0);
    pub const LIGHT: CapabilitySet = CapabilitySet::of(Capability::Light);
    pub const SWITCH: CapabilitySet = CapabilitySet::of(Capability::Switch);
    pub const FAN: CapabilitySet = CapabilitySet::of(Capability::Fan);
    pub const COVER: CapabilitySet = CapabilitySet::of(Capability::Cover);
    pub const LOCK: CapabilitySet = CapabilitySet::of(Capability::Lock);
    pub const CLIMATE: CapabilitySet = CapabilitySet::of(Capability::Climate);
    pub const WINDOW: CapabilitySet = CapabilitySet::of(Capability::Window);
    pub const TEMPERATURE: CapabilitySet = CapabilitySet::of(Capability::Temperature);
    pub const HUMIDITY: CapabilitySet = CapabilitySet::of(Capability::Humidity);
    pub const ENVIRONMENT: CapabilitySet = CapabilitySet::TEMPERATURE.union(CapabilitySet::HUMIDITY);

    pub const fn of(capability: Capability) -> Self {
        CapabilitySet(capability.bit())
    }

    pub const fn union(self, other: CapabilitySet) -> Self {
        CapabilitySet(self.0 | other.0)
    }

    pub const fn contains(self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has(self, capability: Capability) -> bool {
        self.contains(CapabilitySet::of(capability))
    }

    /// Add a capability. Returns true if the bit was not set before.
    pub fn insert(&mut self, capability: Capability) -> bool {
        let before = self.0;
        self.0 |= capability.bit();
        before != self.0
    }

    pub fn is_generic(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.has(*c))
    }

    /// Resolve the dominant category of this set.
    pub fn simplify(self) -> Category {
        PRIORITY
            .iter()
            .find(|(_, required)| self.contains(*required))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Generic)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::GENERIC;
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|c| c.to_string()))
    }
}

/// The single semantic class a device is presented as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Environment,
    Climate,
    Light,
    Fan,
    Cover,
    Window,
    Switch,
    Lock,
    Temperature,
    Humidity,
    #[default]
    Generic,
}

/// Category resolution order. The first entry whose bits are all present
/// wins; a set matching none of them is `Generic`.
pub const PRIORITY: &[(Category, CapabilitySet)] = &[
    (Category::Environment, CapabilitySet::ENVIRONMENT),
    (Category::Climate, CapabilitySet::CLIMATE),
    (Category::Light, CapabilitySet::LIGHT),
    (Category::Fan, CapabilitySet::FAN),
    (Category::Cover, CapabilitySet::COVER),
    (Category::Window, CapabilitySet::WINDOW),
    (Category::Switch, CapabilitySet::SWITCH),
    (Category::Lock, CapabilitySet::LOCK),
    (Category::Temperature, CapabilitySet::TEMPERATURE),
    (Category::Humidity, CapabilitySet::HUMIDITY),
];
