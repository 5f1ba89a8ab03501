//! Diagnostic events recorded against devices.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::api::ObjectKey;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// Event reasons emitted by the device controller.
pub mod reasons {
    pub const CREATED: &str = "Created";
    pub const UPDATED: &str = "Updated";
    pub const DELETED: &str = "Deleted";
    pub const FINALIZED: &str = "Finalized";
    pub const CONFIGURATION_ERROR: &str = "ConfigurationError";
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink for user-visible diagnostics.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);

    fn normal(&self, key: &ObjectKey, reason: &str, message: String) {
        self.record(Event {
            key: key.clone(),
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message,
        });
    }

    fn warning(&self, key: &ObjectKey, reason: &str, message: String) {
        self.record(Event {
            key: key.clone(),
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message,
        });
    }
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                device = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                device = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
