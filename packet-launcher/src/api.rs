//! Device resource types.
//!
//! A [`Device`] pairs the user-declared [`DeviceSpec`] with the last
//! observed [`DeviceStatus`] of the machine on Packet.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing cycle applied when the spec leaves it unset.
pub const DEFAULT_BILLING_CYCLE: &str = "hourly";

/// Identity of a tracked object (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata maintained by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Optimistic concurrency token, bumped by the registry on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Desired state of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub facility: String,
    pub plan: String,
    pub hostname: String,
    pub os: String,
    #[serde(default, alias = "billing_cicle", skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

impl DeviceSpec {
    /// Returns a copy with unset optional fields filled in.
    pub fn with_defaults(&self) -> Self {
        let mut spec = self.clone();
        if spec.billing_cycle.as_deref().map_or(true, str::is_empty) {
            spec.billing_cycle = Some(DEFAULT_BILLING_CYCLE.to_string());
        }
        spec
    }
}

/// Lifecycle state reported by Packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Active,
    Inactive,
    Queued,
    Provisioning,
    #[default]
    #[serde(rename = "")]
    Unknown,
}

impl DeviceState {
    /// Maps a provider state string. Anything unrecognized is `Unknown`.
    pub fn from_provider(state: &str) -> Self {
        match state {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            "queued" => Self::Queued,
            "provisioning" => Self::Provisioning,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Unknown => "",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Address assigned to a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddress {
    pub id: String,
    pub address: String,
    pub gateway: String,
    pub network: String,
    pub address_family: i32,
    pub netmask: String,
    pub public: bool,
}

/// Observed state of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub ready: bool,
    /// Packet device ID, empty until the device has been created.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpAddress>,
}

impl DeviceStatus {
    pub fn is_provisioned(&self) -> bool {
        !self.id.is_empty()
    }
}

/// A device tracked by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub metadata: ObjectMeta,
    pub spec: DeviceSpec,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(namespace: &str, name: &str, spec: DeviceSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            spec,
            status: DeviceStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// Credential record stored next to the devices it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping_is_total() {
        assert_eq!(DeviceState::from_provider("active"), DeviceState::Active);
        assert_eq!(DeviceState::from_provider("inactive"), DeviceState::Inactive);
        assert_eq!(DeviceState::from_provider("queued"), DeviceState::Queued);
        assert_eq!(
            DeviceState::from_provider("provisioning"),
            DeviceState::Provisioning
        );
        assert_eq!(DeviceState::from_provider(""), DeviceState::Unknown);
        for s in ["ACTIVE", "failed", "deprovisioning", " active", "\u{1F4A5}"] {
            assert_eq!(DeviceState::from_provider(s), DeviceState::Unknown);
        }
    }

    #[test]
    fn test_spec_defaults_billing_cycle() {
        let spec = DeviceSpec {
            project_id: "p1".to_string(),
            facility: "ams1".to_string(),
            plan: "small".to_string(),
            hostname: "h1".to_string(),
            os: "ubuntu20".to_string(),
            billing_cycle: None,
            user_data: None,
        };
        assert_eq!(
            spec.with_defaults().billing_cycle.as_deref(),
            Some(DEFAULT_BILLING_CYCLE)
        );

        let mut monthly = spec.clone();
        monthly.billing_cycle = Some("monthly".to_string());
        assert_eq!(
            monthly.with_defaults().billing_cycle.as_deref(),
            Some("monthly")
        );
    }

    #[test]
    fn test_spec_json_field_names() {
        let spec: DeviceSpec = serde_json::from_str(
            r##"{
                "projectID": "p1", "facility": "ams1", "plan": "small", "hostname": "h1",
                "os": "ubuntu20", "billing_cicle": "daily", "userData": "#!/bin/sh"
            }"##,
        )
        .unwrap();
        assert_eq!(spec.project_id, "p1");
        assert_eq!(spec.billing_cycle.as_deref(), Some("daily"));
        assert_eq!(spec.user_data.as_deref(), Some("#!/bin/sh"));

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["billingCycle"], "daily");
    }

    #[test]
    fn test_status_serializes_unknown_state_as_empty() {
        let status = DeviceStatus::default();
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "");
        assert_eq!(value["ready"], false);
        assert!(value.get("ipAddresses").is_none());
    }
}
