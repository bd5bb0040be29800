use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftKind {
    StateMismatch,
    NameMismatch,
    MissingResource,
    ExtraResource,
    IpMismatch,
    NetworkMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftSeverity {
    Informational,
    High,
}

impl DriftKind {
    /// Extra resources are informational; everything else blocking a VM from
    /// matching intent is high severity, per §4.5.
    pub fn default_severity(self) -> DriftSeverity {
        match self {
            DriftKind::ExtraResource => DriftSeverity::Informational,
            _ => DriftSeverity::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub node_name: String,
    pub kind: DriftKind,
    pub severity: DriftSeverity,
    pub detail: String,
}

/// The Drift Detector's current picture for a lab id (§3), derived from Lab
/// Intent ⊕ matching Resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabSnapshot {
    pub lab_id: String,
    pub drifts: Vec<DriftEntry>,
    pub all_expected_running: bool,
}

impl LabSnapshot {
    /// `healthy ⇔ (drifts = ∅ ∧ ∀ expected vm. observed.state = running)`.
    pub fn healthy(&self) -> bool {
        self.drifts.is_empty() && self.all_expected_running
    }
}
