//! Finalizer handling.
//!
//! The finalizer holds deletion of a tracked object open until the Packet
//! device behind it has been removed. All helpers work on an in-memory copy;
//! persisting the result is up to the caller.

use chrono::{DateTime, Utc};

use crate::api::Device;

/// Finalizer owned by this controller.
pub const FINALIZER_NAME: &str = "finalizer.kkohtaka.org";

/// Metadata access needed by the finalizer helpers.
pub trait Finalizable {
    fn deletion_timestamp(&self) -> Option<&DateTime<Utc>>;
    fn finalizers(&self) -> &[String];
    fn finalizers_mut(&mut self) -> &mut Vec<String>;
}

impl Finalizable for Device {
    fn deletion_timestamp(&self) -> Option<&DateTime<Utc>> {
        self.metadata.deletion_timestamp.as_ref()
    }

    fn finalizers(&self) -> &[String] {
        &self.metadata.finalizers
    }

    fn finalizers_mut(&mut self) -> &mut Vec<String> {
        &mut self.metadata.finalizers
    }
}

/// True once the owner has requested removal.
pub fn is_deleting<T: Finalizable>(obj: &T) -> bool {
    obj.deletion_timestamp().is_some()
}

pub fn has_finalizer<T: Finalizable>(obj: &T) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Appends the finalizer unless it is already present.
pub fn add_finalizer<T: Finalizable>(obj: &mut T) {
    if !has_finalizer(obj) {
        obj.finalizers_mut().push(FINALIZER_NAME.to_string());
    }
}

/// Removes the first matching finalizer, keeping the order of the rest.
pub fn remove_finalizer<T: Finalizable>(obj: &mut T) {
    let finalizers = obj.finalizers_mut();
    if let Some(pos) = finalizers.iter().position(|f| f == FINALIZER_NAME) {
        finalizers.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DeviceSpec;

    fn device(finalizers: &[&str]) -> Device {
        let mut d = Device::new("default", "dev-1", DeviceSpec::default());
        d.metadata.finalizers = finalizers.iter().map(|f| f.to_string()).collect();
        d
    }

    #[test]
    fn test_is_deleting() {
        let mut d = device(&[]);
        assert!(!is_deleting(&d));
        d.metadata.deletion_timestamp = Some(Utc::now());
        assert!(is_deleting(&d));
    }

    #[test]
    fn test_add_finalizer_is_idempotent() {
        let mut d = device(&["other"]);
        add_finalizer(&mut d);
        add_finalizer(&mut d);
        assert_eq!(d.metadata.finalizers, vec!["other", FINALIZER_NAME]);
        assert!(has_finalizer(&d));
    }

    #[test]
    fn test_remove_finalizer_preserves_order() {
        let mut d = device(&["a", FINALIZER_NAME, "b"]);
        remove_finalizer(&mut d);
        assert_eq!(d.metadata.finalizers, vec!["a", "b"]);
        assert!(!has_finalizer(&d));
    }

    #[test]
    fn test_remove_finalizer_absent_is_noop() {
        let mut d = device(&["a", "b"]);
        remove_finalizer(&mut d);
        assert_eq!(d.metadata.finalizers, vec!["a", "b"]);
    }
}
