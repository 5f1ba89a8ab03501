//! Reconcilers.
//!
//! A reconciler compares the desired state of one object with the actual
//! state of the resource behind it and takes the actions needed to converge.
//! The dispatcher guarantees that a key is never reconciled twice at once.

pub mod device;
pub mod updater;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::api::ObjectKey;
use crate::clients::ProvisionError;
use crate::credentials::CredentialsError;
use crate::events::{EventRecorder, TracingRecorder};
use crate::registry::RegistryError;

pub use device::DeviceReconciler;
pub use updater::ObjectUpdater;

/// Trait for object reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Run one reconciliation pass for `key`.
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        key: &ObjectKey,
    ) -> Result<Action, ReconcileError>;
}

/// What the dispatcher should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after `delay`.
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Nothing scheduled; wait for the next change.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }
}

/// Errors returned from a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("get Device {key}: {source}")]
    Fetch {
        key: ObjectKey,
        #[source]
        source: RegistryError,
    },

    #[error("resolve credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("create Packet client: {0}")]
    Client(#[source] ProvisionError),

    #[error("{action} Packet device: {source}")]
    Provisioning {
        action: &'static str,
        #[source]
        source: ProvisionError,
    },

    #[error("{action}: {source}")]
    Persist {
        action: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub(crate) fn provisioning(action: &'static str, source: ProvisionError) -> Self {
        match source {
            ProvisionError::Cancelled => Self::Cancelled,
            source => Self::Provisioning { action, source },
        }
    }

    /// True for errors that need operator action; retrying alone won't help.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Credentials(e) => e.is_configuration(),
            Self::Client(_) => true,
            _ => false,
        }
    }

    /// True when the stored object changed underneath this pass.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Fetch { source, .. } | Self::Persist { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

/// Per-invocation context handed to a reconciler by the dispatcher.
#[derive(Clone)]
pub struct ReconcileContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    recorder: Arc<dyn EventRecorder>,
}

impl ReconcileContext {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            cancel: None,
            deadline: None,
            recorder,
        }
    }

    /// Abort outstanding calls once `cancel` flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn recorder(&self) -> &dyn EventRecorder {
        self.recorder.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Drive a provisioning call, abandoning it on cancellation or deadline.
    pub async fn run<T, F>(&self, call: F) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ProvisionError>> + Send,
        T: Send,
    {
        if self.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let cancel = self.cancel.clone();
        let cancelled = async move {
            let Some(mut rx) = cancel else {
                return std::future::pending::<()>().await;
            };
            loop {
                if rx.changed().await.is_err() {
                    // Sender gone; nobody can cancel anymore.
                    return std::future::pending::<()>().await;
                }
                if *rx.borrow() {
                    return;
                }
            }
        };

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = call => result,
            _ = cancelled => Err(ProvisionError::Cancelled),
            _ = expired => Err(ProvisionError::Timeout),
        }
    }
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self::new(Arc::new(TracingRecorder))
    }
}
