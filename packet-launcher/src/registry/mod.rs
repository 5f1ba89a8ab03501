//! Registry of tracked devices and their credentials.
//!
//! The registry persists desired/observed state and delivers change
//! notifications. The controller only depends on the [`Registry`] trait;
//! [`MemoryRegistry`] backs the dev mode and the tests.

mod error;
mod event;
mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::api::{Device, ObjectKey, Secret};

pub use error::{RegistryError, Result};
pub use event::RegistryEvent;
pub use memory::MemoryRegistry;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Get a device by key.
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<Device>>;

    /// List all devices.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Replace a stored device.
    ///
    /// Fails with [`RegistryError::Conflict`] when `device` was read at an
    /// older resource version than the stored one. Returns the stored value.
    async fn update_device(&self, device: Device) -> Result<Device>;

    /// Get a secret by namespace and name.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent>;
}
