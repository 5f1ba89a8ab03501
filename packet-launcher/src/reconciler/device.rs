//! Device reconciler - converges a Device object with its Packet device.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{Action, ObjectUpdater, ReconcileContext, ReconcileError, Reconciler};
use crate::api::{Device, DeviceStatus, ObjectKey};
use crate::clients::{ClientFactory, ProvisioningClient};
use crate::config::Config;
use crate::credentials;
use crate::events::reasons;
use crate::finalizer;
use crate::policy::{NeverUpdate, UpdatePolicy};
use crate::registry::{Registry, RegistryError};

/// Status writes retried after a conflict before the pass gives up.
const STATUS_WRITE_ATTEMPTS: usize = 5;

/// Reconciles Device objects against the Packet API.
pub struct DeviceReconciler {
    registry: Arc<dyn Registry>,
    clients: Arc<dyn ClientFactory>,
    policy: Arc<dyn UpdatePolicy>,
    config: Config,
}

impl DeviceReconciler {
    pub fn new(
        registry: Arc<dyn Registry>,
        clients: Arc<dyn ClientFactory>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            clients,
            policy: Arc::new(NeverUpdate),
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn UpdatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    fn requeue_for(&self, status: &DeviceStatus) -> Action {
        if status.ready {
            Action::requeue(self.config.ready_requeue)
        } else {
            Action::requeue(self.config.not_ready_requeue)
        }
    }

    /// Create the Packet device, or read it back and update it if the policy asks.
    async fn prepare_external(
        &self,
        ctx: &ReconcileContext,
        device: &Device,
        packet: &dyn ProvisioningClient,
    ) -> Result<DeviceStatus, ReconcileError> {
        let key = device.key();
        let spec = device.spec.with_defaults();

        if !device.status.is_provisioned() {
            let status = ctx
                .run(packet.create_device(&spec))
                .await
                .map_err(|e| ReconcileError::provisioning("create", e))?;
            info!("Created Packet device {} for {}", status.id, key);
            ctx.recorder().normal(
                &key,
                reasons::CREATED,
                format!("Created Packet device {}", status.id),
            );
            return Ok(status);
        }

        let id = &device.status.id;
        let status = ctx
            .run(packet.get_device(id))
            .await
            .map_err(|e| ReconcileError::provisioning("get", e))?;

        if !self.policy.should_update(&device.spec, &status) {
            return Ok(status);
        }

        let status = ctx
            .run(packet.update_device(id, &spec))
            .await
            .map_err(|e| ReconcileError::provisioning("update", e))?;
        info!("Updated Packet device {} for {}", id, key);
        ctx.recorder()
            .normal(&key, reasons::UPDATED, format!("Updated Packet device {}", id));
        Ok(status)
    }

    /// Delete the Packet device if one was ever created.
    async fn remove_external(
        &self,
        ctx: &ReconcileContext,
        device: &Device,
        packet: &dyn ProvisioningClient,
    ) -> Result<(), ReconcileError> {
        if !device.status.is_provisioned() {
            debug!("No Packet device recorded for {}", device.key());
            return Ok(());
        }

        let id = &device.status.id;
        match ctx.run(packet.delete_device(id)).await {
            Ok(()) => {
                info!("Deleted Packet device {} for {}", id, device.key());
                ctx.recorder().normal(
                    &device.key(),
                    reasons::DELETED,
                    format!("Deleted Packet device {}", id),
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Packet device {} already gone", id);
                Ok(())
            }
            Err(e) => Err(ReconcileError::provisioning("delete", e)),
        }
    }

    /// Store the observed status, re-reading the object on conflicts.
    ///
    /// A freshly created Packet device is only known through this status, so
    /// a concurrent edit or deletion request must not drop its ID.
    async fn persist_status(
        &self,
        device: Device,
        status: DeviceStatus,
    ) -> Result<Device, RegistryError> {
        let mut current = device;
        let mut attempt = 1;
        loop {
            let result = ObjectUpdater::new(self.registry.as_ref(), &current)
                .set_status(status.clone())
                .update()
                .await;
            match result {
                Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!("Status write for {} conflicted, retrying: {}", current.key(), e);
                    let key = current.key();
                    current = self
                        .registry
                        .get_device(&key)
                        .await?
                        .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn report(&self, ctx: &ReconcileContext, key: &ObjectKey, err: &ReconcileError) {
        match err {
            ReconcileError::Cancelled => {}
            e if e.is_configuration() => {
                ctx.recorder()
                    .warning(key, reasons::CONFIGURATION_ERROR, e.to_string())
            }
            ReconcileError::Provisioning { .. } => {
                ctx.recorder()
                    .warning(key, reasons::PROVISIONING_FAILED, err.to_string())
            }
            _ => {}
        }
    }

    async fn reconcile_device(
        &self,
        ctx: &ReconcileContext,
        key: &ObjectKey,
    ) -> Result<Action, ReconcileError> {
        let device = match self.registry.get_device(key).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!("Device {} not found, nothing to do", key);
                return Ok(Action::await_change());
            }
            Err(source) => {
                return Err(ReconcileError::Fetch {
                    key: key.clone(),
                    source,
                })
            }
        };

        let creds =
            credentials::resolve(self.registry.as_ref(), &key.namespace, &self.config.secret_name)
                .await?;
        let packet = self
            .clients
            .client(&creds.api_key)
            .map_err(ReconcileError::Client)?;

        if finalizer::is_deleting(&device) {
            self.remove_external(ctx, &device, packet.as_ref()).await?;
            ObjectUpdater::new(self.registry.as_ref(), &device)
                .remove_finalizer()
                .update()
                .await
                .map_err(|source| ReconcileError::Persist {
                    action: "remove finalizer",
                    source,
                })?;
            info!("Device {} was finalized", key);
            ctx.recorder()
                .normal(key, reasons::FINALIZED, "Device was finalized".to_string());
            return Ok(Action::await_change());
        }

        // The finalizer must be stored before anything exists on Packet.
        let device = if finalizer::has_finalizer(&device) {
            device
        } else {
            ObjectUpdater::new(self.registry.as_ref(), &device)
                .add_finalizer()
                .update()
                .await
                .map_err(|source| ReconcileError::Persist {
                    action: "set finalizer",
                    source,
                })?
        };

        let status = self.prepare_external(ctx, &device, packet.as_ref()).await?;
        if status.state != device.status.state {
            info!(
                "Device {} is {} (was {})",
                key, status.state, device.status.state
            );
        }

        let device = self
            .persist_status(device, status)
            .await
            .map_err(|source| ReconcileError::Persist {
                action: "update Device",
                source,
            })?;

        Ok(self.requeue_for(&device.status))
    }
}

#[async_trait]
impl Reconciler for DeviceReconciler {
    #[instrument(skip_all, fields(device = %key))]
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        key: &ObjectKey,
    ) -> Result<Action, ReconcileError> {
        let result = self.reconcile_device(ctx, key).await;
        if let Err(e) = &result {
            if !matches!(e, ReconcileError::Cancelled) {
                warn!("Reconciling device {} failed: {}", key, e);
            }
            self.report(ctx, key, e);
        }
        result
    }
}
