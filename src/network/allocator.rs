use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::network::lease::NetworkLease;

/// Configuration for the VLAN pool and CIDR template (§4.6). The pool bounds
/// and cooldown are left as configuration per §9's open question rather than
/// hardcoded to either subnet range observed in the source.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub vlan_low: u16,
    pub vlan_high: u16,
    /// A template containing `{vlan}` substituted with the acquired tag, e.g.
    /// `"10.{vlan}.0.0/24"`.
    pub cidr_template: String,
    pub gateway_suffix: String,
    pub release_cooldown: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            vlan_low: 100,
            vlan_high: 170,
            cidr_template: "10.{vlan}.0.0/24".to_string(),
            gateway_suffix: ".1".to_string(),
            release_cooldown: Duration::from_secs(300),
        }
    }
}

struct AllocatorState {
    free: BTreeSet<u16>,
    owned: HashMap<u16, String>,
    cooling_down: Vec<(u16, Instant)>,
}

/// Owns the VLAN pool behind a single lock (§5's shared-resource policy:
/// "Network Allocator state is serialized behind a single lock; acquisitions
/// are brief").
pub struct NetworkAllocator {
    config: AllocatorConfig,
    state: Mutex<AllocatorState>,
}

impl NetworkAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        let free: BTreeSet<u16> = (config.vlan_low..=config.vlan_high).collect();
        Self {
            config,
            state: Mutex::new(AllocatorState {
                free,
                owned: HashMap::new(),
                cooling_down: Vec::new(),
            }),
        }
    }

    fn reclaim_cooled_down(&self, state: &mut AllocatorState) {
        let now = Instant::now();
        let cooldown = self.config.release_cooldown;
        let (ready, still_cooling): (Vec<_>, Vec<_>) = state
            .cooling_down
            .drain(..)
            .partition(|(_, released_at)| now.duration_since(*released_at) >= cooldown);
        state.cooling_down = still_cooling;
        for (vlan, _) in ready {
            state.free.insert(vlan);
        }
    }

    /// Finds the lowest-numbered free VLAN tag, marks it owned by `lab_id`,
    /// and returns a lease. Fails with `PoolExhausted` when no tag is free.
    pub fn acquire(&self, lab_id: &str) -> Result<NetworkLease, CoreError> {
        let mut state = self.state.lock().expect("allocator lock poisoned");
        self.reclaim_cooled_down(&mut state);

        let vlan = *state.free.iter().next().ok_or(CoreError::PoolExhausted)?;
        state.free.remove(&vlan);
        state.owned.insert(vlan, lab_id.to_string());

        let cidr = self.config.cidr_template.replace("{vlan}", &vlan.to_string());
        let gateway_ip = derive_gateway_ip(&cidr, &self.config.gateway_suffix);

        Ok(NetworkLease::new(vlan, cidr, gateway_ip, lab_id))
    }

    /// Returns the lease's tag to the pool once `release_cooldown` elapses.
    pub fn release(&self, lease: &NetworkLease) {
        let mut state = self.state.lock().expect("allocator lock poisoned");
        state.owned.remove(&lease.vlan);
        state.cooling_down.push((lease.vlan, Instant::now()));
    }

    /// Reconstructs the currently-owned lease for `lab_id`, if any. Used to
    /// release a lab's VLAN tag when it is torn down well after the deploy
    /// call that acquired it has returned.
    pub fn lease_for_lab(&self, lab_id: &str) -> Option<NetworkLease> {
        let state = self.state.lock().expect("allocator lock poisoned");
        let vlan = state.owned.iter().find(|(_, owner)| owner.as_str() == lab_id).map(|(vlan, _)| *vlan)?;
        let cidr = self.config.cidr_template.replace("{vlan}", &vlan.to_string());
        let gateway_ip = derive_gateway_ip(&cidr, &self.config.gateway_suffix);
        Some(NetworkLease::new(vlan, cidr, gateway_ip, lab_id))
    }
}

/// Derives a gateway address from a CIDR by replacing the host portion with
/// the configured suffix, e.g. `10.100.0.0/24` + `.1` → `10.100.0.1`.
fn derive_gateway_ip(cidr: &str, suffix: &str) -> String {
    let network = cidr.split('/').next().unwrap_or(cidr);
    let mut octets: Vec<&str> = network.split('.').collect();
    if octets.len() == 4 {
        let host_octet = suffix.trim_start_matches('.');
        octets[3] = host_octet;
        octets.join(".")
    } else {
        format!("{network}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> NetworkAllocator {
        NetworkAllocator::new(AllocatorConfig {
            vlan_low: 100,
            vlan_high: 102,
            cidr_template: "10.{vlan}.0.0/24".to_string(),
            gateway_suffix: ".1".to_string(),
            release_cooldown: Duration::from_millis(20),
        })
    }

    #[test]
    fn acquires_lowest_free_tag_first() {
        let alloc = allocator();
        let a = alloc.acquire("lab-a").unwrap();
        let b = alloc.acquire("lab-b").unwrap();
        assert_eq!(a.vlan, 100);
        assert_eq!(b.vlan, 101);
        assert_eq!(a.cidr, "10.100.0.0/24");
        assert_eq!(a.gateway_ip, "10.100.0.1");
    }

    #[test]
    fn exhaustion_is_pool_exhausted() {
        let alloc = allocator();
        alloc.acquire("lab-a").unwrap();
        alloc.acquire("lab-b").unwrap();
        alloc.acquire("lab-c").unwrap();
        assert!(matches!(alloc.acquire("lab-d"), Err(CoreError::PoolExhausted)));
    }

    #[test]
    fn released_tag_returns_after_cooldown() {
        let alloc = allocator();
        let lease = alloc.acquire("lab-a").unwrap();
        alloc.release(&lease);

        // second and third tags still free immediately
        alloc.acquire("lab-b").unwrap();
        alloc.acquire("lab-c").unwrap();
        assert!(matches!(alloc.acquire("lab-d"), Err(CoreError::PoolExhausted)));

        std::thread::sleep(Duration::from_millis(30));
        let reacquired = alloc.acquire("lab-e").unwrap();
        assert_eq!(reacquired.vlan, lease.vlan);
        assert_eq!(reacquired.lab_id, "lab-e");
    }
}
