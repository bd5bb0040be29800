use serde::{Deserialize, Serialize};

use crate::deploy::intent::NodeKind;

/// Observable state machine per task (§4.7): `pending → cloning →
/// configuring → starting → waiting_ip → live | failed`, plus `skipped` when
/// a dependency failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Cloning,
    Configuring,
    Starting,
    WaitingIp,
    Live,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Live | TaskState::Failed | TaskState::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub node_name: String,
    pub kind: NodeKind,
    pub state: TaskState,
    pub native_id: Option<String>,
    pub observed_ip: Option<String>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn pending(node_name: &str, kind: NodeKind) -> Self {
        Self {
            node_name: node_name.to_string(),
            kind,
            state: TaskState::Pending,
            native_id: None,
            observed_ip: None,
            error: None,
        }
    }
}
