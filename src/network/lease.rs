use serde::{Deserialize, Serialize};

/// A reserved isolated subnet (§3): VLAN tag, CIDR, gateway IP, owning lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkLease {
    pub lease_id: String,
    pub vlan: u16,
    pub cidr: String,
    pub gateway_ip: String,
    pub lab_id: String,
}

impl NetworkLease {
    pub fn new(vlan: u16, cidr: impl Into<String>, gateway_ip: impl Into<String>, lab_id: impl Into<String>) -> Self {
        Self {
            lease_id: ulid::Ulid::new().to_string(),
            vlan,
            cidr: cidr.into(),
            gateway_ip: gateway_ip.into(),
            lab_id: lab_id.into(),
        }
    }
}
