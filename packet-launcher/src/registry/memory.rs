//! In-memory registry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{Registry, RegistryError, RegistryEvent, Result};
use crate::api::{Device, ObjectKey, Secret};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct State {
    devices: BTreeMap<ObjectKey, Device>,
    secrets: BTreeMap<(String, String), Secret>,
    last_version: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// Registry keeping everything in process memory.
///
/// Mirrors the semantics the controller relies on: every write bumps the
/// resource version, stale writes are rejected, and an object with a
/// deletion timestamp is removed once its last finalizer is gone.
pub struct MemoryRegistry {
    state: RwLock<State>,
    events: broadcast::Sender<RegistryEvent>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    fn emit(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Add a new device.
    pub async fn create_device(&self, mut device: Device) -> Result<Device> {
        let key = device.key();
        let mut state = self.state.write().await;
        if state.devices.contains_key(&key) {
            return Err(RegistryError::AlreadyExists(key.to_string()));
        }
        device.metadata.uid = uuid::Uuid::new_v4().to_string();
        device.metadata.resource_version = state.next_version();
        state.devices.insert(key, device.clone());
        drop(state);

        debug!(device = %device.key(), "Device added");
        self.emit(RegistryEvent::DeviceAdded(device.clone()));
        Ok(device)
    }

    /// Request removal of a device.
    ///
    /// Devices without finalizers are removed right away; otherwise the
    /// deletion timestamp is set and removal waits for the finalizers.
    pub async fn delete_device(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.write().await;
        let old = state
            .devices
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;

        if old.metadata.finalizers.is_empty() {
            state.devices.remove(key);
            drop(state);
            debug!(device = %key, "Device removed");
            self.emit(RegistryEvent::DeviceRemoved(key.clone()));
            return Ok(());
        }

        if old.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }

        let mut new = old.clone();
        new.metadata.deletion_timestamp = Some(Utc::now());
        new.metadata.resource_version = state.next_version();
        state.devices.insert(key.clone(), new.clone());
        drop(state);

        debug!(device = %key, "Device deletion requested");
        self.emit(RegistryEvent::DeviceModified { old, new });
        Ok(())
    }

    /// Store a secret, replacing any previous one with the same name.
    pub async fn put_secret(&self, secret: Secret) {
        let mut state = self.state.write().await;
        state
            .secrets
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<Device>> {
        Ok(self.state.read().await.devices.get(key).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.state.read().await.devices.values().cloned().collect())
    }

    async fn update_device(&self, mut device: Device) -> Result<Device> {
        let key = device.key();
        let mut state = self.state.write().await;
        let old = state
            .devices
            .get(&key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;

        if old.metadata.resource_version != device.metadata.resource_version {
            return Err(RegistryError::Conflict {
                key: key.to_string(),
                expected: device.metadata.resource_version,
                actual: old.metadata.resource_version,
            });
        }

        // Owned by the registry.
        device.metadata.uid = old.metadata.uid.clone();
        device.metadata.deletion_timestamp = old.metadata.deletion_timestamp;
        device.metadata.resource_version = state.next_version();

        if device.metadata.deletion_timestamp.is_some() && device.metadata.finalizers.is_empty() {
            state.devices.remove(&key);
            drop(state);
            debug!(device = %key, "Device finalized and removed");
            self.emit(RegistryEvent::DeviceRemoved(key));
            return Ok(device);
        }

        state.devices.insert(key, device.clone());
        drop(state);
        self.emit(RegistryEvent::DeviceModified {
            old,
            new: device.clone(),
        });
        Ok(device)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .state
            .read()
            .await
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}
