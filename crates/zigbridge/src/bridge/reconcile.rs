use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::payload::DeviceDescriptor;
use super::payload::NodeType;
use crate::error::BridgeError;
use crate::registry::DeviceId;
use crate::registry::DeviceRegistry;
use crate::registry::LocationId;
use crate::registry::NewDevice;
use crate::registry::RegistryLink;

/// What one pass over a device list did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records created for unknown hardware.
    pub created: usize,
    /// Placeholders bound to hardware.
    pub relinked: usize,
    /// Existing records whose exposures, capabilities or hardware id changed.
    pub updated: usize,
    /// Entries dropped because of an error.
    pub skipped: usize,
    /// Placeholders bound in this pass that the bridge still calls by
    /// another name, with that name.
    pub bound: Vec<(DeviceId, String)>,
}

impl ReconcileReport {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.relinked == 0 && self.updated == 0
    }
}

/// Matches the bridge's device list against the registry.
///
/// Never removes records; removal only follows a bridge log event.
pub struct DeviceListReconciler<'a> {
    registry: &'a mut dyn DeviceRegistry,
    auto_create: bool,
    default_location: Option<LocationId>,
}

enum Matched {
    Existing(DeviceId),
    Relinked(DeviceId),
    Created(DeviceId),
}

impl<'a> DeviceListReconciler<'a> {
    pub fn new(
        registry: &'a mut dyn DeviceRegistry,
        auto_create: bool,
        default_location: Option<LocationId>,
    ) -> Self {
        Self {
            registry,
            auto_create,
            default_location,
        }
    }

    /// Reconcile a device-list payload. Bad entries are logged and skipped;
    /// only a payload that is not a list at all fails.
    pub fn reconcile(&mut self, topic: &str, payload: &[u8]) -> Result<ReconcileReport, BridgeError> {
        let entries: Vec<Value> = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::validation(topic, format!("device list: {}", e)))?;

        let mut report = ReconcileReport::default();
        for entry in entries {
            if let Err(e) = self.reconcile_entry(topic, entry, &mut report) {
                warn!("Skipping device list entry: {}", e);
                report.skipped += 1;
            }
        }

        if report.is_noop() {
            debug!("Device list unchanged ({} skipped)", report.skipped);
        } else {
            info!(
                "Device list reconciled: {} created, {} relinked, {} updated, {} skipped",
                report.created, report.relinked, report.updated, report.skipped
            );
        }
        Ok(report)
    }

    fn reconcile_entry(
        &mut self,
        topic: &str,
        entry: Value,
        report: &mut ReconcileReport,
    ) -> Result<(), BridgeError> {
        let node_type = entry
            .get("type")
            .cloned()
            .and_then(|t| serde_json::from_value::<NodeType>(t).ok())
            .unwrap_or(NodeType::Unknown);
        if !node_type.is_device() {
            return Ok(());
        }

        let descriptor: DeviceDescriptor = serde_json::from_value(entry)
            .map_err(|e| BridgeError::validation(topic, e.to_string()))?;

        let matched = self.match_record(&descriptor)?;
        let existing = matches!(matched, Matched::Existing(_));
        let relinked = matches!(matched, Matched::Relinked(_));
        let id = match matched {
            Matched::Existing(id) => id,
            Matched::Relinked(id) => {
                report.relinked += 1;
                id
            }
            Matched::Created(id) => {
                report.created += 1;
                id
            }
        };

        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| BridgeError::Lookup(id.to_string()))?;
        if relinked && record.friendly_name() != descriptor.friendly_name {
            report.bound.push((id, descriptor.friendly_name.clone()));
        }

        let mut changed = false;
        if let Some(exposes) = descriptor.exposes() {
            if record.exposes != exposes {
                record.exposes = exposes.to_vec();
                changed = true;
            }
            changed |= record.classification.absorb(exposes);
        }
        if record.ieee.is_none() {
            record.ieee = Some(descriptor.ieee.clone());
            changed = true;
        }

        if changed {
            debug!(
                "Device {} now classified as {}",
                record.friendly_name(),
                record.classification.category()
            );
            if existing {
                report.updated += 1;
            }
        }
        Ok(())
    }

    fn match_record(&mut self, descriptor: &DeviceDescriptor) -> Result<Matched, BridgeError> {
        if let Some(id) = self.registry.find_by_hardware_id(&descriptor.ieee) {
            return Ok(Matched::Existing(id));
        }

        if let Some(id) = self.registry.find_placeholder() {
            self.registry.bind(id, descriptor.ieee.clone())?;
            info!(
                "Bound placeholder {} to {} ({})",
                id, descriptor.ieee, descriptor.friendly_name
            );
            return Ok(Matched::Relinked(id));
        }

        if !self.auto_create {
            return Err(BridgeError::Config(format!(
                "{} ({}) is unknown and auto-create is disabled",
                descriptor.friendly_name, descriptor.ieee
            )));
        }

        let location = self
            .default_location
            .or_else(|| self.registry.main_location())
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "no location to create {} in",
                    descriptor.friendly_name
                ))
            })?;

        let id = self.registry.create(NewDevice {
            friendly_name: descriptor.friendly_name.clone(),
            location,
            link: RegistryLink::Bound(descriptor.ieee.clone()),
        })?;
        info!(
            "Created device {} for {} ({})",
            id, descriptor.ieee, descriptor.friendly_name
        );
        Ok(Matched::Created(id))
    }
}
