//! Shared test utilities for packet-launcher integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use packet_launcher::api::{Device, DeviceSpec, ObjectKey, Secret};
use packet_launcher::clients::SimulatedProvider;
use packet_launcher::credentials::{DEFAULT_SECRET_NAME, SECRET_KEY_API_KEY};
use packet_launcher::events::MemoryRecorder;
use packet_launcher::registry::{MemoryRegistry, Registry, RegistryEvent, Result};
use packet_launcher::{Config, DeviceReconciler, ReconcileContext};

pub const NAMESPACE: &str = "default";
pub const API_KEY: &str = "test-api-key";

pub fn spec() -> DeviceSpec {
    DeviceSpec {
        project_id: "p1".to_string(),
        facility: "ams1".to_string(),
        plan: "small".to_string(),
        hostname: "h1".to_string(),
        os: "ubuntu20".to_string(),
        billing_cycle: None,
        user_data: None,
    }
}

pub fn test_config() -> Config {
    Config {
        not_ready_requeue: Duration::from_millis(20),
        ready_requeue: Duration::from_secs(60),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        reconcile_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Registry, provider and recorder wired to a device reconciler.
pub struct TestEnv {
    pub registry: Arc<MemoryRegistry>,
    pub provider: SimulatedProvider,
    pub recorder: MemoryRecorder,
    pub config: Config,
}

impl TestEnv {
    /// Environment with the credentials secret in place.
    pub async fn new() -> Self {
        let env = Self::without_secret();
        env.registry
            .put_secret(
                Secret::new(NAMESPACE, DEFAULT_SECRET_NAME)
                    .with_entry(SECRET_KEY_API_KEY, API_KEY),
            )
            .await;
        env
    }

    pub fn without_secret() -> Self {
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            provider: SimulatedProvider::new(),
            recorder: MemoryRecorder::new(),
            config: Config {
                not_ready_requeue: Duration::from_secs(15),
                ready_requeue: Duration::from_secs(300),
                ..Config::default()
            },
        }
    }

    pub fn reconciler(&self) -> DeviceReconciler {
        DeviceReconciler::new(
            self.registry.clone(),
            Arc::new(self.provider.clone()),
            self.config.clone(),
        )
    }

    pub fn ctx(&self) -> ReconcileContext {
        ReconcileContext::new(Arc::new(self.recorder.clone()))
    }

    pub async fn add_device(&self, name: &str) -> Device {
        self.registry
            .create_device(Device::new(NAMESPACE, name, spec()))
            .await
            .unwrap()
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<Device> {
        self.registry.get_device(key).await.unwrap()
    }
}

/// Registry that hands out copies one resource version behind the stored one.
pub struct StaleRegistry {
    pub inner: Arc<MemoryRegistry>,
}

#[async_trait]
impl Registry for StaleRegistry {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<Device>> {
        Ok(self.inner.get_device(key).await?.map(|mut d| {
            d.metadata.resource_version = d.metadata.resource_version.saturating_sub(1);
            d
        }))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.inner.list_devices().await
    }

    async fn update_device(&self, device: Device) -> Result<Device> {
        self.inner.update_device(device).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.inner.get_secret(namespace, name).await
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.subscribe()
    }
}

/// What another writer does to a device while its Packet device is created.
#[derive(Debug, Clone, Copy)]
pub enum ConcurrentWrite {
    RequestDeletion,
    EditSpec,
}

/// Registry that lets another writer change the device right before the
/// first status write carrying a Packet device ID.
pub struct RacingRegistry {
    pub inner: Arc<MemoryRegistry>,
    write: ConcurrentWrite,
    fired: AtomicBool,
}

impl RacingRegistry {
    pub fn new(inner: Arc<MemoryRegistry>, write: ConcurrentWrite) -> Self {
        Self {
            inner,
            write,
            fired: AtomicBool::new(false),
        }
    }

    async fn interfere(&self, key: &ObjectKey) -> Result<()> {
        match self.write {
            ConcurrentWrite::RequestDeletion => self.inner.delete_device(key).await,
            ConcurrentWrite::EditSpec => {
                if let Some(mut device) = self.inner.get_device(key).await? {
                    device.spec.hostname = "h1-renamed".to_string();
                    self.inner.update_device(device).await?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Registry for RacingRegistry {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<Device>> {
        self.inner.get_device(key).await
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.inner.list_devices().await
    }

    async fn update_device(&self, device: Device) -> Result<Device> {
        if device.status.is_provisioned() && !self.fired.swap(true, Ordering::SeqCst) {
            self.interfere(&device.key()).await?;
        }
        self.inner.update_device(device).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.inner.get_secret(namespace, name).await
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.subscribe()
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
