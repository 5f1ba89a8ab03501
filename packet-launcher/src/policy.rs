//! Update decision policy.

use crate::api::{DeviceSpec, DeviceStatus};

/// Decides whether an existing device needs a mutating update call.
pub trait UpdatePolicy: Send + Sync {
    fn should_update(&self, spec: &DeviceSpec, status: &DeviceStatus) -> bool;
}

/// Never updates a provisioned device.
///
/// The observed status carries none of the spec fields, so there is nothing
/// to diff against. Spec changes after creation are not applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverUpdate;

impl UpdatePolicy for NeverUpdate {
    fn should_update(&self, _spec: &DeviceSpec, _status: &DeviceStatus) -> bool {
        false
    }
}
