use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `pending → starting → deploying_vm? → injecting → verifying → completed |
/// failed | cancelled` (§4.8). `deploying_vm` is entered only for an
/// ephemeral target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionState {
    Pending,
    Starting,
    DeployingVm,
    Injecting,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl MissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MissionState::Completed | MissionState::Failed | MissionState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    StepFailed,
    Timeout,
    Cancelled,
    IncompatibleOs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub exploit_name: String,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
