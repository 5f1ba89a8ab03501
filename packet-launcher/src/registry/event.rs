//! Change notifications emitted by the registry.

use crate::api::{Device, ObjectKey};

/// Emitted after a write has been applied.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A device was added.
    DeviceAdded(Device),
    /// A device was modified (spec, status, metadata or deletion request).
    DeviceModified { old: Device, new: Device },
    /// A device was physically removed.
    DeviceRemoved(ObjectKey),
}

impl RegistryEvent {
    /// Key of the object this event refers to.
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::DeviceAdded(d) => d.key(),
            Self::DeviceModified { new, .. } => new.key(),
            Self::DeviceRemoved(key) => key.clone(),
        }
    }
}
