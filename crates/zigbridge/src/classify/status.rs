use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::capability::Category;

/// Typed status fields a device may report.
///
/// Which fields are maintained depends on the device's dominant category;
/// see [`handler_for`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    /// `true` when the contact is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heating_setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_mode: Option<String>,
}

/// Per-category status update rule.
pub trait StatusHandler: Sync {
    /// Copy the keys this category cares about from `payload` into `status`.
    /// Returns whether any field changed.
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool;
}

/// Pick the status rule for a category.
pub fn handler_for(category: Category) -> &'static dyn StatusHandler {
    match category {
        Category::Environment => &Environment,
        Category::Climate => &Climate,
        Category::Light => &Light,
        Category::Fan => &Fan,
        Category::Cover => &Cover,
        Category::Window => &Window,
        Category::Switch | Category::Generic => &OnOff,
        Category::Lock => &Lock,
        Category::Temperature => &Temperature,
        Category::Humidity => &Humidity,
    }
}

fn set<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(v) if slot.as_ref() != Some(&v) => {
            *slot = Some(v);
            true
        }
        _ => false,
    }
}

/// Bridge switches report `"ON"`/`"OFF"`, some sensors plain booleans.
fn on_off(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("on") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("off") => Some(false),
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value?.as_f64()
}

fn byte(value: Option<&Value>) -> Option<u8> {
    value?.as_u64().map(|v| v.min(u8::MAX as u64) as u8)
}

fn text(value: Option<&Value>) -> Option<String> {
    value?.as_str().map(str::to_string)
}

struct OnOff;
struct Light;
struct Fan;
struct Cover;
struct Lock;
struct Climate;
struct Window;
struct Environment;
struct Temperature;
struct Humidity;

impl StatusHandler for OnOff {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        set(&mut status.on, on_off(payload.get("state")))
    }
}

impl StatusHandler for Light {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        let on = set(&mut status.on, on_off(payload.get("state")));
        let brightness = set(&mut status.brightness, byte(payload.get("brightness")));
        on | brightness
    }
}

impl StatusHandler for Fan {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        let on = set(&mut status.on, on_off(payload.get("state")));
        let mode = set(&mut status.fan_mode, text(payload.get("fan_mode")));
        on | mode
    }
}

impl StatusHandler for Cover {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        // Covers report OPEN/CLOSE/STOP as state; open counts as on.
        let state = payload.get("state").and_then(Value::as_str).and_then(|s| {
            match s.to_ascii_uppercase().as_str() {
                "OPEN" => Some(true),
                "CLOSE" | "CLOSED" => Some(false),
                _ => None,
            }
        });
        let on = set(&mut status.on, state);
        let position = set(&mut status.position, byte(payload.get("position")));
        on | position
    }
}

impl StatusHandler for Lock {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        let from_state = payload.get("state").and_then(Value::as_str).and_then(|s| {
            match s.to_ascii_uppercase().as_str() {
                "LOCK" => Some(true),
                "UNLOCK" => Some(false),
                _ => None,
            }
        });
        let from_lock_state = payload
            .get("lock_state")
            .and_then(Value::as_str)
            .and_then(|s| match s {
                "locked" => Some(true),
                "unlocked" | "not_fully_locked" => Some(false),
                _ => None,
            });
        set(&mut status.locked, from_lock_state.or(from_state))
    }
}

impl StatusHandler for Climate {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        let local = set(
            &mut status.local_temperature,
            number(payload.get("local_temperature")),
        );
        let setpoint = set(
            &mut status.heating_setpoint,
            number(payload.get("current_heating_setpoint")),
        );
        let mode = set(&mut status.system_mode, text(payload.get("system_mode")));
        local | setpoint | mode
    }
}

impl StatusHandler for Window {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        set(
            &mut status.contact,
            payload.get("contact").and_then(Value::as_bool),
        )
    }
}

impl StatusHandler for Environment {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        let t = Temperature.apply(status, payload);
        let h = Humidity.apply(status, payload);
        t | h
    }
}

impl StatusHandler for Temperature {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        set(&mut status.temperature, number(payload.get("temperature")))
    }
}

impl StatusHandler for Humidity {
    fn apply(&self, status: &mut DeviceStatus, payload: &Map<String, Value>) -> bool {
        set(&mut status.humidity, number(payload.get("humidity")))
    }
}
