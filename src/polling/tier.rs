use std::time::Duration;

/// Per-backend polling tiers (§4.4): VMs refresh fastest, inventory slowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingTier {
    /// Virtual machines — high-fidelity lab state, ≈10s.
    VirtualMachines,
    /// Templates / hosts — slow-changing inventory, ≈60s.
    Inventory,
    /// Discovery (DHCP leases, ARP) — MAC → IP correlation, ≈15s.
    Discovery,
}

impl PollingTier {
    pub fn default_period(self) -> Duration {
        match self {
            PollingTier::VirtualMachines => Duration::from_secs(10),
            PollingTier::Inventory => Duration::from_secs(60),
            PollingTier::Discovery => Duration::from_secs(15),
        }
    }

    pub fn kind_filter(self) -> Option<&'static str> {
        match self {
            PollingTier::VirtualMachines => Some("vm"),
            PollingTier::Inventory => None,
            PollingTier::Discovery => None,
        }
    }
}
