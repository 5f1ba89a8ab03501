//! Copy-on-write updates of a fetched device.
//!
//! The fetched device is never mutated. Changes are applied to a copy and
//! written back only when the copy differs from the original by value.

use tracing::debug;

use crate::api::{Device, DeviceStatus};
use crate::finalizer;
use crate::registry::{Registry, Result};

pub struct ObjectUpdater<'a> {
    registry: &'a dyn Registry,
    old: &'a Device,
    new: Device,
}

impl<'a> ObjectUpdater<'a> {
    pub fn new(registry: &'a dyn Registry, old: &'a Device) -> Self {
        Self {
            registry,
            old,
            new: old.clone(),
        }
    }

    pub fn add_finalizer(mut self) -> Self {
        finalizer::add_finalizer(&mut self.new);
        self
    }

    pub fn remove_finalizer(mut self) -> Self {
        finalizer::remove_finalizer(&mut self.new);
        self
    }

    pub fn set_status(mut self, status: DeviceStatus) -> Self {
        self.new.status = status;
        self
    }

    pub fn is_changed(&self) -> bool {
        self.new != *self.old
    }

    /// Writes the copy if it changed and returns the current device.
    pub async fn update(self) -> Result<Device> {
        if !self.is_changed() {
            return Ok(self.new);
        }
        debug!("Persisting changes to device {}", self.old.key());
        self.registry.update_device(self.new).await
    }
}
