//! Clients for the Packet provisioning API.
//!
//! The reconciler talks to Packet only through [`ProvisioningClient`], which
//! speaks in [`DeviceSpec`]/[`DeviceStatus`] terms:
//! - create/update fill in the default billing cycle
//! - get reports `NotFound` once the device is gone
//! - every call is safe to retry

pub mod simulated;
pub mod status;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::{DeviceSpec, DeviceStatus};

pub use simulated::SimulatedProvider;
pub use status::{project_status, ProviderDevice, ProviderIpAddress};

/// Errors returned by the provisioning API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// The device does not exist (anymore).
    #[error("device {0} not found")]
    NotFound(String),

    /// The API answered with an error.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call was abandoned because the reconciliation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The call did not finish before the reconciliation deadline.
    #[error("deadline exceeded")]
    Timeout,
}

impl ProvisionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Create/read/update/delete of a single Packet device.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Create a device. Applies the default billing cycle when unset.
    async fn create_device(&self, spec: &DeviceSpec) -> Result<DeviceStatus>;

    /// Get a device by Packet ID.
    async fn get_device(&self, device_id: &str) -> Result<DeviceStatus>;

    /// Update a device. Applies the default billing cycle when unset.
    async fn update_device(&self, device_id: &str, spec: &DeviceSpec) -> Result<DeviceStatus>;

    /// Delete a device.
    async fn delete_device(&self, device_id: &str) -> Result<()>;
}

/// Builds provisioning clients from an API key.
pub trait ClientFactory: Send + Sync {
    fn client(&self, api_key: &str) -> Result<Arc<dyn ProvisioningClient>>;
}
