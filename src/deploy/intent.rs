use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Gateway,
    Vm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub template_ref: String,
    pub name: String,
    pub cpu: u32,
    pub memory_mb: u64,
    pub disks_gb: Vec<u64>,
    pub network_edges: Vec<String>,
}

/// The declarative design submitted for deployment (§3). Immutable after
/// acceptance — reconfiguration is a new intent, not a mutation of this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabIntent {
    pub lab_id: String,
    pub nodes: Vec<NodeSpec>,
    pub mission_id: Option<String>,
}

impl LabIntent {
    /// Rejects intents that can't form a valid gateway-then-tenants DAG: no
    /// gateway, more than one gateway, or duplicate node names (which would
    /// make the dependency graph ambiguous and, in the degenerate case,
    /// cyclic against itself).
    pub fn validate(&self) -> Result<(), CoreError> {
        let gateways = self.nodes.iter().filter(|n| n.kind == NodeKind::Gateway).count();
        if gateways != 1 {
            return Err(CoreError::ConfigInvalid(format!(
                "lab intent must have exactly one gateway node, found {gateways}"
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(CoreError::ConfigInvalid(format!(
                    "duplicate node name '{}' forms a cycle in the dependency graph",
                    node.name
                )));
            }
        }

        Ok(())
    }

    pub fn gateway(&self) -> &NodeSpec {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::Gateway)
            .expect("validated intent has exactly one gateway")
    }

    pub fn tenants(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind, name: &str) -> NodeSpec {
        NodeSpec {
            kind,
            template_ref: "tmpl".to_string(),
            name: name.to_string(),
            cpu: 1,
            memory_mb: 512,
            disks_gb: vec![20],
            network_edges: vec!["lab".to_string()],
        }
    }

    #[test]
    fn rejects_missing_gateway() {
        let intent = LabIntent { lab_id: "L1".to_string(), nodes: vec![node(NodeKind::Vm, "A")], mission_id: None };
        assert!(matches!(intent.validate(), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let intent = LabIntent {
            lab_id: "L1".to_string(),
            nodes: vec![node(NodeKind::Gateway, "GW"), node(NodeKind::Vm, "A"), node(NodeKind::Vm, "A")],
            mission_id: None,
        };
        assert!(matches!(intent.validate(), Err(CoreError::ConfigInvalid(_))));
    }

    #[test]
    fn accepts_single_gateway_and_unique_names() {
        let intent = LabIntent {
            lab_id: "L1".to_string(),
            nodes: vec![node(NodeKind::Gateway, "GW"), node(NodeKind::Vm, "A"), node(NodeKind::Vm, "B")],
            mission_id: None,
        };
        assert!(intent.validate().is_ok());
    }
}
