//! Controller configuration.

use std::time::Duration;

use crate::credentials::DEFAULT_SECRET_NAME;

/// Requeue interval while a device is still converging.
pub const DEFAULT_NOT_READY_REQUEUE: Duration = Duration::from_secs(15);

/// Re-check interval for ready devices.
pub const DEFAULT_READY_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Tunables for the device controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requeue delay for devices that are not ready yet.
    pub not_ready_requeue: Duration,
    /// Requeue delay for ready devices (periodic health re-check).
    pub ready_requeue: Duration,
    /// Name of the credentials secret looked up per namespace.
    pub secret_name: String,
    /// Maximum concurrent reconciliations across devices.
    pub workers: usize,
    /// Deadline for a single reconciliation.
    pub reconcile_timeout: Duration,
    /// First retry delay after a failed reconciliation.
    pub backoff_base: Duration,
    /// Retry delay cap.
    pub backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            not_ready_requeue: DEFAULT_NOT_READY_REQUEUE,
            ready_requeue: DEFAULT_READY_REQUEUE,
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            workers: 4,
            reconcile_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    /// Retry delay after `failures` consecutive failures (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}
