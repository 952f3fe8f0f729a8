//! Local device registry.
//!
//! The registry is the store of [`DeviceRecord`]s the bridge state is
//! reconciled against. [`DeviceRegistry`] is the seam to a persistence
//! backend; [`MemoryRegistry`] keeps everything in process.

mod device;
mod memory;

pub use device::DeviceId;
pub use device::DeviceRecord;
pub use device::IeeeAddr;
pub use device::LocationId;
pub use device::NewDevice;
pub use device::RegistryLink;
pub use memory::MemoryRegistry;

use crate::error::BridgeError;

/// Store of device records.
///
/// Implementations must keep friendly names unique across records and must
/// never re-bind a record that already carries a hardware link.
pub trait DeviceRegistry: Send {
    /// Create a record. Fails with [`BridgeError::Conflict`] if the name or
    /// the hardware id is already in use.
    fn create(&mut self, device: NewDevice) -> Result<DeviceId, BridgeError>;

    fn get(&self, id: DeviceId) -> Option<&DeviceRecord>;

    fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord>;

    fn find_by_hardware_id(&self, ieee: &IeeeAddr) -> Option<DeviceId>;

    fn find_by_name(&self, name: &str) -> Option<DeviceId>;

    /// An unlinked record waiting for hardware, if any.
    fn find_placeholder(&self) -> Option<DeviceId>;

    /// Link a placeholder record to hardware.
    fn bind(&mut self, id: DeviceId, ieee: IeeeAddr) -> Result<(), BridgeError>;

    /// Change a record's friendly name. Fails with [`BridgeError::Conflict`]
    /// if another record uses `name`, leaving the registry unchanged.
    fn rename(&mut self, id: DeviceId, name: &str) -> Result<(), BridgeError>;

    fn remove(&mut self, id: DeviceId) -> Option<DeviceRecord>;

    /// Location new devices go to when nothing else is configured.
    fn main_location(&self) -> Option<LocationId>;

    fn devices(&self) -> Vec<&DeviceRecord>;
}
