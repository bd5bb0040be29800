//! The Resource data model (spec §3): the unit of state mirrored by the
//! Polling Agents from backend observations into the Lab Registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Globally unique across backends: `(backend_kind, backend_instance_id,
/// native_id)`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub backend_kind: String,
    pub backend_instance_id: String,
    pub native_id: String,
}

impl ResourceIdentity {
    pub fn new(
        backend_kind: impl Into<String>,
        backend_instance_id: impl Into<String>,
        native_id: impl Into<String>,
    ) -> Self {
        Self {
            backend_kind: backend_kind.into(),
            backend_instance_id: backend_instance_id.into(),
            native_id: native_id.into(),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.backend_kind, self.backend_instance_id, self.native_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Vm,
    Template,
    Network,
    Host,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Running,
    Stopped,
    Paused,
    Unknown,
    Error,
}

/// A monotonically increasing counter bumped on every registry-accepted
/// update, carried on events so an at-least-once consumer can deduplicate by
/// `(identity, version)` per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceVersion(pub u64);

impl ResourceVersion {
    pub fn initial() -> Self {
        ResourceVersion(1)
    }

    pub fn next(self) -> Self {
        ResourceVersion(self.0 + 1)
    }
}

/// The typed configuration bag carried by a resource: everything a polling
/// agent observed or a deploy task supplied that isn't part of its identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub cpu: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disks_gb: Vec<u64>,
    pub nics: Vec<String>,
    pub tags: HashMap<String, String>,
    pub observed_ip: Option<String>,
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub identity: ResourceIdentity,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub name: String,
    pub lab_id: Option<String>,
    pub config: ResourceConfig,
    pub version: ResourceVersion,
    /// Wall-clock time of the last backend observation that produced this
    /// state, used to age a resource into `Unknown` past a grace window.
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl Resource {
    pub fn new(identity: ResourceIdentity, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            identity,
            kind,
            state: ResourceState::Unknown,
            name: name.into(),
            lab_id: None,
            config: ResourceConfig::default(),
            version: ResourceVersion::initial(),
            last_seen: chrono::Utc::now(),
        }
    }

    pub fn with_lab(mut self, lab_id: impl Into<String>) -> Self {
        self.lab_id = Some(lab_id.into());
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    /// Ages this resource to `Unknown` if it hasn't been observed within
    /// `grace` of `now`, per §3's grace-window invariant.
    pub fn apply_grace_window(&mut self, now: chrono::DateTime<chrono::Utc>, grace: chrono::Duration) {
        if self.state != ResourceState::Unknown && now - self.last_seen > grace {
            self.state = ResourceState::Unknown;
            self.version = self.version.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_ignores_unrelated_fields() {
        let a = ResourceIdentity::new("onprem", "host-1", "vm-42");
        let b = ResourceIdentity::new("onprem", "host-1", "vm-42");
        assert_eq!(a, b);
    }

    #[test]
    fn grace_window_ages_stale_resource_to_unknown() {
        let mut r = Resource::new(
            ResourceIdentity::new("onprem", "host-1", "vm-42"),
            ResourceKind::Vm,
            "web-01",
        )
        .with_state(ResourceState::Running);
        r.last_seen = chrono::Utc::now() - chrono::Duration::seconds(100);

        r.apply_grace_window(chrono::Utc::now(), chrono::Duration::seconds(30));

        assert_eq!(r.state, ResourceState::Unknown);
        assert_eq!(r.version, ResourceVersion(2));
    }

    #[test]
    fn grace_window_leaves_fresh_resource_alone() {
        let mut r = Resource::new(
            ResourceIdentity::new("onprem", "host-1", "vm-42"),
            ResourceKind::Vm,
            "web-01",
        )
        .with_state(ResourceState::Running);

        r.apply_grace_window(chrono::Utc::now(), chrono::Duration::seconds(30));

        assert_eq!(r.state, ResourceState::Running);
        assert_eq!(r.version, ResourceVersion(1));
    }
}
