//! Device capability classification.
//!
//! Exposure descriptors from the bridge are folded into an additive
//! [`CapabilitySet`], which resolves to one dominant [`Category`] through
//! the [`PRIORITY`] table. The category then selects the [`StatusHandler`]
//! used to read device payloads.

mod capability;
mod exposure;
mod status;

pub use capability::Capability;
pub use capability::CapabilitySet;
pub use capability::Category;
pub use capability::PRIORITY;
pub use exposure::Classification;
pub use exposure::DeviceClass;
pub use exposure::Exposure;
pub use exposure::ValueKind;
pub use status::handler_for;
pub use status::DeviceStatus;
pub use status::StatusHandler;
