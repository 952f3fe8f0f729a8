use serde_json::Value;
use tracing::debug;
use tracing::info;

use super::join::JoinWindowController;
use super::outbox::Outbox;
use super::payload::LogPayload;
use crate::error::BridgeError;
use crate::event::BridgeEvent;
use crate::event::EventBus;
use crate::registry::DeviceId;
use crate::registry::DeviceRegistry;

const INTERVIEW_SUCCESSFUL: &str = "interview_successful";

/// A `bridge/log` event, typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeLog {
    DeviceRemoved(String),
    DeviceRenamed { from: String, to: String },
    DeviceRemoveFailed(String),
    DeviceForceRemoved(String),
    /// A pairing progress report. `friendly_name` is only known once the
    /// interview went through.
    Pairing {
        stage: String,
        friendly_name: Option<String>,
    },
    OtaUpdate,
    Other(String),
}

impl BridgeLog {
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, BridgeError> {
        let log: LogPayload = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::validation(topic, e.to_string()))?;
        let kind = log
            .kind
            .ok_or_else(|| BridgeError::validation(topic, "log event without type"))?;

        let meta_name = meta_friendly_name(log.meta.as_ref());
        let message_text = || {
            log.message
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| BridgeError::validation(topic, format!("{}: message is not a name", kind)))
        };

        let event = match kind.as_str() {
            "device_removed" => match meta_name {
                Some(name) => BridgeLog::DeviceRemoved(name),
                None => BridgeLog::DeviceRemoved(message_text()?),
            },
            "device_renamed" => {
                let field = |key: &str| {
                    log.message
                        .get(key)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            BridgeError::validation(topic, format!("device_renamed without '{}'", key))
                        })
                };
                BridgeLog::DeviceRenamed {
                    from: field("from")?,
                    to: field("to")?,
                }
            }
            "device_removed_failed" => BridgeLog::DeviceRemoveFailed(message_text()?),
            "device_force_removed" => BridgeLog::DeviceForceRemoved(message_text()?),
            "pairing" => {
                let stage = match &log.message {
                    Value::String(s) => s.clone(),
                    other => other.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
                };
                // Older bridges nest meta inside the message.
                let friendly_name = meta_name.or_else(|| meta_friendly_name(log.message.get("meta")));
                BridgeLog::Pairing {
                    stage,
                    friendly_name,
                }
            }
            "ota_update" => BridgeLog::OtaUpdate,
            _ => BridgeLog::Other(kind.clone()),
        };
        Ok(event)
    }
}

fn meta_friendly_name(meta: Option<&Value>) -> Option<String> {
    meta?.get("friendly_name")?.as_str().map(str::to_string)
}

/// Applies bridge log events to the registry and the join window.
pub struct LogEventInterpreter<'a> {
    pub registry: &'a mut dyn DeviceRegistry,
    pub join: &'a mut JoinWindowController,
    pub outbox: &'a Outbox,
    pub events: &'a EventBus,
}

impl LogEventInterpreter<'_> {
    pub fn interpret(&mut self, event: BridgeLog) -> Result<(), BridgeError> {
        match event {
            BridgeLog::DeviceRemoved(name) | BridgeLog::DeviceForceRemoved(name) => {
                self.remove(&name)
            }
            BridgeLog::DeviceRenamed { from, to } => self.rename(&from, &to),
            BridgeLog::DeviceRemoveFailed(name) => {
                info!("Bridge failed to remove {}, forcing removal", name);
                self.outbox.force_remove_device(&name);
                Ok(())
            }
            BridgeLog::Pairing {
                stage,
                friendly_name,
            } => {
                if stage != INTERVIEW_SUCCESSFUL {
                    debug!("Pairing: {}", stage);
                    return Ok(());
                }
                self.pairing_complete(friendly_name)
            }
            BridgeLog::OtaUpdate => {
                debug!("Firmware update in progress");
                Ok(())
            }
            BridgeLog::Other(kind) => {
                debug!("Ignoring bridge log event '{}'", kind);
                Ok(())
            }
        }
    }

    fn remove(&mut self, name: &str) -> Result<(), BridgeError> {
        let id = self
            .registry
            .find_by_name(name)
            .ok_or_else(|| BridgeError::Lookup(name.to_string()))?;
        self.registry.remove(id);
        info!("Removed device {} ({})", name, id);
        self.events.emit(BridgeEvent::DeviceRemoved {
            device: id,
            friendly_name: name.to_string(),
        });
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BridgeError> {
        let Some(id) = self.registry.find_by_name(from) else {
            debug!("Rename of unknown device {} ignored", from);
            return Ok(());
        };
        self.registry.rename(id, to)?;
        info!("Renamed device {} to {}", from, to);
        self.events.emit(BridgeEvent::DeviceRenamed {
            device: id,
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn pairing_complete(&mut self, friendly_name: Option<String>) -> Result<(), BridgeError> {
        let completion = self.join.complete_pairing();
        debug!("Pairing session finished: {:?}", completion);

        if let Some(name) = friendly_name.as_deref() {
            if let Some(id) = self.registry.find_by_name(name) {
                info!("Device {} paired", name);
                self.announce(id, name.to_string());
                return Ok(());
            }
        }

        // New hardware is reported under the bridge's own name, which only
        // the device list ties to a record.
        self.outbox.query_device_list();
        let name = friendly_name.ok_or_else(|| {
            BridgeError::validation("bridge/log", "interview_successful without friendly name")
        })?;
        let pending = completion
            .pending
            .and_then(|id| Some((id, self.registry.get(id)?.friendly_name().to_string())));
        match pending {
            Some((id, record_name)) => {
                info!("Device {} paired for {}", name, record_name);
                self.announce(id, record_name);
            }
            None => info!("Device {} paired, waiting for the device list", name),
        }
        Ok(())
    }

    fn announce(&self, device: DeviceId, friendly_name: String) {
        self.events.emit(BridgeEvent::DeviceAdded {
            device,
            friendly_name,
        });
    }
}
