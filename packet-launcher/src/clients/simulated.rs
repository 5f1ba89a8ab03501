//! In-process stand-in for the Packet API.
//!
//! Devices start `queued`, move to `provisioning` on the first read and
//! become `active` after a configurable number of reads. Every call is
//! recorded, and failures can be injected per operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::status::{project_status, ProviderDevice, ProviderIpAddress};
use super::{ClientFactory, ProvisionError, ProvisioningClient, Result};
use crate::api::{DeviceSpec, DeviceStatus};

/// Operations of the provisioning API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Get,
    Update,
    Delete,
}

/// A call received by the simulated provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(DeviceSpec),
    Get(String),
    Update(String, DeviceSpec),
    Delete(String),
}

struct SimDevice {
    raw: ProviderDevice,
    reads: u32,
    /// Set for devices placed with [`SimulatedProvider::put_device`].
    pinned: bool,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, SimDevice>,
    calls: Vec<Call>,
    failures: HashMap<Operation, ProvisionError>,
    api_keys: Vec<String>,
    next_id: u64,
}

/// Simulated Packet API, cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedProvider {
    inner: Arc<Mutex<Inner>>,
    activation_reads: u32,
    latency: Option<Duration>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            activation_reads: 2,
            latency: None,
        }
    }

    /// Number of reads after which a new device reports `active`.
    pub fn with_activation_reads(mut self, reads: u32) -> Self {
        self.activation_reads = reads;
        self
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ProvisionError::Transport("simulated provider poisoned".to_string()))
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: Operation, error: ProvisionError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures.insert(op, error);
        }
    }

    /// Place a device with a fixed state; reads do not advance it.
    pub fn put_device(&self, device: ProviderDevice) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.devices.insert(
                device.id.clone(),
                SimDevice {
                    raw: device,
                    reads: 0,
                    pinned: true,
                },
            );
        }
    }

    /// Force the state of an existing device.
    pub fn set_state(&self, device_id: &str, state: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(device) = inner.devices.get_mut(device_id) {
                device.raw.state = state.to_string();
                device.pinned = true;
            }
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .lock()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_of(&self, op: Operation) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation() == op)
            .collect()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.devices.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// API keys clients were built with.
    pub fn api_keys(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.api_keys.clone())
            .unwrap_or_default()
    }

    async fn begin(&self, call: Call) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let op = call.operation();
        let mut inner = self.lock()?;
        inner.calls.push(call);
        match inner.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn state_after(&self, reads: u32) -> &'static str {
        if reads >= self.activation_reads {
            "active"
        } else if reads == 0 {
            "queued"
        } else {
            "provisioning"
        }
    }

    fn addresses(id: u64) -> Vec<ProviderIpAddress> {
        let host = id % 250 + 2;
        vec![
            ProviderIpAddress {
                id: format!("ip-{}-public", id),
                address: format!("147.75.100.{}", host),
                gateway: "147.75.100.1".to_string(),
                network: "147.75.100.0".to_string(),
                address_family: 4,
                netmask: "255.255.255.0".to_string(),
                public: true,
            },
            ProviderIpAddress {
                id: format!("ip-{}-private", id),
                address: format!("10.80.0.{}", host),
                gateway: "10.80.0.1".to_string(),
                network: "10.80.0.0".to_string(),
                address_family: 4,
                netmask: "255.255.255.0".to_string(),
                public: false,
            },
        ]
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::Create(_) => Operation::Create,
            Call::Get(_) => Operation::Get,
            Call::Update(..) => Operation::Update,
            Call::Delete(_) => Operation::Delete,
        }
    }
}

#[async_trait]
impl ProvisioningClient for SimulatedProvider {
    async fn create_device(&self, spec: &DeviceSpec) -> Result<DeviceStatus> {
        let spec = spec.with_defaults();
        self.begin(Call::Create(spec.clone())).await?;

        let mut inner = self.lock()?;
        inner.next_id += 1;
        let seq = inner.next_id;
        let raw = ProviderDevice {
            id: uuid::Uuid::new_v4().to_string(),
            hostname: spec.hostname.clone(),
            state: self.state_after(0).to_string(),
            network: Self::addresses(seq),
        };
        debug!(device_id = %raw.id, hostname = %raw.hostname, "Simulated device created");
        let status = project_status(&raw);
        inner.devices.insert(
            raw.id.clone(),
            SimDevice {
                raw,
                reads: 0,
                pinned: false,
            },
        );
        Ok(status)
    }

    async fn get_device(&self, device_id: &str) -> Result<DeviceStatus> {
        self.begin(Call::Get(device_id.to_string())).await?;

        let mut inner = self.lock()?;
        let device = inner
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ProvisionError::NotFound(device_id.to_string()))?;
        if !device.pinned {
            device.reads = device.reads.saturating_add(1);
            device.raw.state = self.state_after(device.reads).to_string();
        }
        Ok(project_status(&device.raw))
    }

    async fn update_device(&self, device_id: &str, spec: &DeviceSpec) -> Result<DeviceStatus> {
        let spec = spec.with_defaults();
        self.begin(Call::Update(device_id.to_string(), spec.clone()))
            .await?;

        let mut inner = self.lock()?;
        let device = inner
            .devices
            .get_mut(device_id)
            .ok_or_else(|| ProvisionError::NotFound(device_id.to_string()))?;
        device.raw.hostname = spec.hostname;
        Ok(project_status(&device.raw))
    }

    async fn delete_device(&self, device_id: &str) -> Result<()> {
        self.begin(Call::Delete(device_id.to_string())).await?;

        let mut inner = self.lock()?;
        match inner.devices.remove(device_id) {
            Some(_) => {
                debug!(device_id, "Simulated device deleted");
                Ok(())
            }
            None => Err(ProvisionError::NotFound(device_id.to_string())),
        }
    }
}

impl ClientFactory for SimulatedProvider {
    fn client(&self, api_key: &str) -> Result<Arc<dyn ProvisioningClient>> {
        self.lock()?.api_keys.push(api_key.to_string());
        Ok(Arc::new(self.clone()))
    }
}
