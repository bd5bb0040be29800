use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::deploy::intent::LabIntent;
use crate::registry::snapshot::{DriftEntry, DriftKind, LabSnapshot};
use crate::registry::LabRegistry;
use crate::resource::{Resource, ResourceState};

/// Subscribed (conceptually) to `lab:*`, recomputing a Lab Snapshot whenever a
/// lab's resources change, per §4.5.
pub struct DriftDetector {
    registry: Arc<dyn LabRegistry>,
    lab_subnets: Mutex<HashMap<String, String>>,
}

impl DriftDetector {
    pub fn new(registry: Arc<dyn LabRegistry>) -> Self {
        Self { registry, lab_subnets: Mutex::new(HashMap::new()) }
    }

    /// Records the lease's CIDR for `lab_id` so `ip_mismatch` can be detected;
    /// called by the Deployment Engine once a lease is acquired.
    pub fn set_lab_subnet(&self, lab_id: &str, cidr: impl Into<String>) {
        self.lab_subnets.lock().expect("lock poisoned").insert(lab_id.to_string(), cidr.into());
    }

    /// Runs the §4.5 comparison algorithm and writes the result back to the
    /// registry, which persists it and emits `drift_detected` /
    /// `drift_resolved` against the previous snapshot.
    pub fn reconcile(&self, intent: &LabIntent) -> LabSnapshot {
        let resources = self.registry.resources_for_lab(&intent.lab_id);
        let subnet = self.lab_subnets.lock().expect("lock poisoned").get(&intent.lab_id).cloned();

        let mut expected_names = HashSet::new();
        let mut drifts = Vec::new();

        let mut nodes: Vec<&crate::deploy::intent::NodeSpec> = vec![intent.gateway()];
        nodes.extend(intent.tenants());

        for node in nodes {
            expected_names.insert(node.name.clone());
            match find_matching_resource(&resources, &node.name) {
                None => drifts.push(drift(&node.name, DriftKind::MissingResource, "no matching resource observed")),
                Some(resource) => {
                    if resource.name != node.name {
                        drifts.push(drift(&node.name, DriftKind::NameMismatch, &format!("observed name '{}'", resource.name)));
                    }
                    if resource.state != ResourceState::Running {
                        drifts.push(drift(&node.name, DriftKind::StateMismatch, &format!("observed state {:?}", resource.state)));
                    }
                    if let (Some(ip), Some(cidr)) = (&resource.config.observed_ip, &subnet) {
                        if !ip_in_cidr(ip, cidr) {
                            drifts.push(drift(&node.name, DriftKind::IpMismatch, &format!("{ip} not in {cidr}")));
                        }
                    }
                }
            }
        }

        for resource in &resources {
            if !expected_names.contains(&resource.name) {
                drifts.push(drift(&resource.name, DriftKind::ExtraResource, "not present in lab intent"));
            }
        }

        self.registry.record_drift(&intent.lab_id, drifts)
    }
}

fn drift(node_name: &str, kind: DriftKind, detail: &str) -> DriftEntry {
    DriftEntry { node_name: node_name.to_string(), kind, severity: kind.default_severity(), detail: detail.to_string() }
}

/// Finds the resource that corresponds to `desired_name`: an exact match, or
/// failing that a case-insensitive / suffixed match (so a rename shows up as
/// `name_mismatch` rather than `missing_resource` + `extra_resource`).
fn find_matching_resource<'a>(resources: &'a [Resource], desired_name: &str) -> Option<&'a Resource> {
    resources
        .iter()
        .find(|r| r.name == desired_name)
        .or_else(|| {
            resources.iter().find(|r| {
                r.name.eq_ignore_ascii_case(desired_name)
                    || r.name.starts_with(desired_name)
                    || desired_name.starts_with(r.name.as_str())
            })
        })
}

fn ip_in_cidr(ip: &str, cidr: &str) -> bool {
    let mut parts = cidr.splitn(2, '/');
    let network = match parts.next().and_then(|s| Ipv4Addr::from_str(s).ok()) {
        Some(ip) => ip,
        None => return true,
    };
    let prefix_len: u32 = match parts.next().and_then(|s| s.parse().ok()) {
        Some(p) => p,
        None => return true,
    };
    let addr = match Ipv4Addr::from_str(ip) {
        Ok(ip) => ip,
        Err(_) => return false,
    };

    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    u32::from(network) & mask == u32::from(addr) & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::intent::{NodeKind, NodeSpec};
    use crate::registry::memory::InMemoryLabRegistry;
    use crate::resource::{ResourceIdentity, ResourceKind};

    fn intent() -> LabIntent {
        LabIntent {
            lab_id: "L1".to_string(),
            nodes: vec![
                NodeSpec { kind: NodeKind::Gateway, template_ref: "t".into(), name: "GW".into(), cpu: 1, memory_mb: 512, disks_gb: vec![], network_edges: vec![] },
                NodeSpec { kind: NodeKind::Vm, template_ref: "t".into(), name: "A".into(), cpu: 1, memory_mb: 512, disks_gb: vec![], network_edges: vec![] },
            ],
            mission_id: None,
        }
    }

    #[test]
    fn missing_vm_produces_missing_resource_drift() {
        let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
        let detector = DriftDetector::new(registry.clone());
        registry.register(
            Resource::new(ResourceIdentity::new("onprem", "h1", "gw-1"), ResourceKind::Gateway, "GW")
                .with_lab("L1")
                .with_state(ResourceState::Running),
        ).unwrap();

        let snapshot = detector.reconcile(&intent());
        assert!(!snapshot.healthy());
        assert!(snapshot.drifts.iter().any(|d| d.node_name == "A" && d.kind == DriftKind::MissingResource));
    }

    #[test]
    fn healthy_when_all_present_and_running() {
        let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
        let detector = DriftDetector::new(registry.clone());
        for name in ["GW", "A"] {
            registry.register(
                Resource::new(ResourceIdentity::new("onprem", "h1", name), ResourceKind::Vm, name)
                    .with_lab("L1")
                    .with_state(ResourceState::Running),
            ).unwrap();
        }

        let snapshot = detector.reconcile(&intent());
        assert!(snapshot.healthy());
    }

    #[test]
    fn ip_mismatch_detected_outside_lab_subnet() {
        let registry: Arc<dyn LabRegistry> = Arc::new(InMemoryLabRegistry::new());
        let detector = DriftDetector::new(registry.clone());
        detector.set_lab_subnet("L1", "10.100.0.0/24");

        let mut gw = Resource::new(ResourceIdentity::new("onprem", "h1", "gw-1"), ResourceKind::Gateway, "GW")
            .with_lab("L1")
            .with_state(ResourceState::Running);
        gw.config.observed_ip = Some("192.168.1.5".to_string());
        registry.register(gw).unwrap();
        registry.register(
            Resource::new(ResourceIdentity::new("onprem", "h1", "a-1"), ResourceKind::Vm, "A")
                .with_lab("L1")
                .with_state(ResourceState::Running),
        ).unwrap();

        let snapshot = detector.reconcile(&intent());
        assert!(snapshot.drifts.iter().any(|d| d.node_name == "GW" && d.kind == DriftKind::IpMismatch));
    }
}
