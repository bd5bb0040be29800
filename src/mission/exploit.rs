use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExploitType {
    Web,
    Network,
    Privesc,
    Credential,
    Misconfig,
    Ad,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsFamily {
    Linux,
    Windows,
}

/// Exactly one of these is ever present on an [`Exploit`] — enforced by
/// construction rather than by an invariant checked at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExploitBody {
    Script(String),
    Playbook { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exploit {
    pub name: String,
    pub exploit_type: ExploitType,
    pub severity: u8,
    pub target_os_family: OsFamily,
    pub body: ExploitBody,
    pub variables: HashMap<String, String>,
    pub cve: Option<String>,
    /// If true, a non-zero exit for this step cancels the mission instead of
    /// just recording a failed step (§4.8).
    pub fatal_on_fail: bool,
}
