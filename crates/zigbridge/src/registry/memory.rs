use std::collections::BTreeMap;

use super::DeviceId;
use super::DeviceRecord;
use super::DeviceRegistry;
use super::IeeeAddr;
use super::LocationId;
use super::NewDevice;
use super::RegistryLink;
use crate::error::BridgeError;

/// In-process registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: BTreeMap<DeviceId, DeviceRecord>,
    next_id: u32,
    main_location: Option<LocationId>,
}

impl MemoryRegistry {
    pub fn new(main_location: Option<LocationId>) -> Self {
        Self {
            devices: BTreeMap::new(),
            next_id: 1,
            main_location,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn name_taken(&self, name: &str, except: Option<DeviceId>) -> bool {
        self.devices
            .values()
            .any(|d| d.friendly_name() == name && Some(d.id()) != except)
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn create(&mut self, device: NewDevice) -> Result<DeviceId, BridgeError> {
        if self.name_taken(&device.friendly_name, None) {
            return Err(BridgeError::Conflict(format!(
                "friendly name '{}' already in use",
                device.friendly_name
            )));
        }
        if let RegistryLink::Bound(ieee) = &device.link {
            if self.find_by_hardware_id(ieee).is_some() {
                return Err(BridgeError::Conflict(format!(
                    "hardware id {} already registered",
                    ieee
                )));
            }
        }

        let id = DeviceId(self.next_id.max(1));
        self.next_id = id.0 + 1;
        self.devices.insert(id, DeviceRecord::new(id, device));
        Ok(id)
    }

    fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(&id)
    }

    fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(&id)
    }

    fn find_by_hardware_id(&self, ieee: &IeeeAddr) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| matches!(d.link(), RegistryLink::Bound(bound) if bound == ieee))
            .map(DeviceRecord::id)
    }

    fn find_by_name(&self, name: &str) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| d.friendly_name() == name)
            .map(DeviceRecord::id)
    }

    fn find_placeholder(&self) -> Option<DeviceId> {
        self.devices
            .values()
            .find(|d| d.is_placeholder())
            .map(DeviceRecord::id)
    }

    fn bind(&mut self, id: DeviceId, ieee: IeeeAddr) -> Result<(), BridgeError> {
        if let Some(other) = self.find_by_hardware_id(&ieee) {
            if other != id {
                return Err(BridgeError::Conflict(format!(
                    "hardware id {} already bound to device {}",
                    ieee, other
                )));
            }
        }
        let record = self
            .devices
            .get_mut(&id)
            .ok_or_else(|| BridgeError::Lookup(id.to_string()))?;
        match record.link() {
            RegistryLink::Placeholder => {
                record.set_link(RegistryLink::Bound(ieee));
                Ok(())
            }
            RegistryLink::Bound(existing) if *existing == ieee => Ok(()),
            RegistryLink::Bound(existing) => Err(BridgeError::Conflict(format!(
                "device {} is already bound to {}",
                id, existing
            ))),
        }
    }

    fn rename(&mut self, id: DeviceId, name: &str) -> Result<(), BridgeError> {
        if self.name_taken(name, Some(id)) {
            return Err(BridgeError::Conflict(format!(
                "friendly name '{}' already in use",
                name
            )));
        }
        let record = self
            .devices
            .get_mut(&id)
            .ok_or_else(|| BridgeError::Lookup(id.to_string()))?;
        record.set_friendly_name(name.to_string());
        Ok(())
    }

    fn remove(&mut self, id: DeviceId) -> Option<DeviceRecord> {
        self.devices.remove(&id)
    }

    fn main_location(&self) -> Option<LocationId> {
        self.main_location
    }

    fn devices(&self) -> Vec<&DeviceRecord> {
        self.devices.values().collect()
    }
}
