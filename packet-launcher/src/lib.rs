//! packet-launcher: drives Packet devices to match declared Device objects.
//!
//! - [`reconciler::DeviceReconciler`] runs one reconciliation pass per object
//! - [`controller::Controller`] dispatches passes, one per key at a time
//! - [`registry`] and [`clients`] are the seams towards the object store and
//!   the Packet API

pub mod api;
pub mod clients;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod events;
pub mod finalizer;
pub mod policy;
pub mod reconciler;
pub mod registry;

pub use api::{Device, DeviceSpec, DeviceState, DeviceStatus, IpAddress, ObjectKey, Secret};
pub use config::Config;
pub use controller::Controller;
pub use reconciler::{Action, DeviceReconciler, ReconcileContext, ReconcileError, Reconciler};
pub use registry::{MemoryRegistry, Registry, RegistryError};
