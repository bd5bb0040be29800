//! The Lab Registry (§4.3): a process-external key/value + pub/sub store,
//! modeled here as a trait so the Deployment Engine and Drift Detector hold
//! it as a capability rather than a concrete type — see DESIGN.md for why
//! that avoids the cyclic-reference problem the source has between the
//! engine and the registry (§9).

pub mod memory;
pub mod snapshot;

use crate::error::CoreError;
use crate::event::channel::EventConsumer;
use crate::event::RegistryEvent;
use crate::registry::snapshot::{DriftEntry, LabSnapshot};
use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceVersion};
use std::time::Duration;

/// A subscription target for registry events (§4.3): `all`, `lab:<id>`, or
/// `kind:<k>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChannel {
    All,
    Lab(String),
    Kind(ResourceKind),
}

pub trait LabRegistry: Send + Sync {
    /// Upserts a resource, bumping its version and emitting `created` or
    /// `updated`.
    fn register(&self, resource: Resource) -> Result<ResourceVersion, CoreError>;

    /// If the current resource for `identity` has not been seen within
    /// `grace`, transitions it to `unknown` and emits `state_changed`.
    fn mark_missing(&self, identity: &ResourceIdentity, grace: Duration) -> Result<(), CoreError>;

    fn get(&self, identity: &ResourceIdentity) -> Option<Resource>;

    fn resources_for_lab(&self, lab_id: &str) -> Vec<Resource>;

    /// All resources currently known for one backend instance, across labs —
    /// what a polling agent diffs its fresh listing against (§4.4).
    fn resources_for_backend(&self, backend_kind: &str, backend_instance_id: &str) -> Vec<Resource>;

    /// Records the set of node names the Lab Intent expects for `lab_id`, so
    /// `snapshot`'s `healthy` predicate can be computed without holding a
    /// reference back to the intent store.
    fn set_expected_names(&self, lab_id: &str, names: Vec<String>);

    /// Persists a freshly computed drift list for `lab_id`, diffs it against
    /// the previously recorded one to emit `drift_detected` / `drift_resolved`,
    /// and returns the resulting snapshot.
    fn record_drift(&self, lab_id: &str, drifts: Vec<DriftEntry>) -> LabSnapshot;

    /// Assembles the current Lab Snapshot deterministically from the per-lab
    /// set and the last recorded drift list.
    fn snapshot(&self, lab_id: &str) -> LabSnapshot;

    fn subscribe(&self, channel: RegistryChannel) -> EventConsumer<RegistryEvent>;
}
