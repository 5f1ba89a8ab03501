//! Projection of raw Packet device responses onto [`DeviceStatus`].

use serde::{Deserialize, Serialize};

use crate::api::{DeviceState, DeviceStatus, IpAddress};

/// Device as returned by the Packet API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDevice {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "ip_addresses")]
    pub network: Vec<ProviderIpAddress>,
}

/// IP assignment as returned by the Packet API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIpAddress {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub network: String,
    pub address_family: i32,
    #[serde(default)]
    pub netmask: String,
    pub public: bool,
}

impl From<&ProviderIpAddress> for IpAddress {
    fn from(ip: &ProviderIpAddress) -> Self {
        IpAddress {
            id: ip.id.clone(),
            address: ip.address.clone(),
            gateway: ip.gateway.clone(),
            network: ip.network.clone(),
            address_family: ip.address_family,
            netmask: ip.netmask.clone(),
            public: ip.public,
        }
    }
}

/// Builds the observed status for a provider device.
///
/// Unknown states map to [`DeviceState::Unknown`]; `ready` is set only for
/// active devices. Addresses are copied as-is, in order.
pub fn project_status(device: &ProviderDevice) -> DeviceStatus {
    let state = DeviceState::from_provider(&device.state);
    DeviceStatus {
        ready: state == DeviceState::Active,
        id: device.id.clone(),
        state,
        ip_addresses: device.network.iter().map(IpAddress::from).collect(),
    }
}
