use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::error::CoreError;
use crate::event::broadcaster::UnboundedBroadcast;
use crate::event::channel::EventConsumer;
use crate::event::{RegistryEvent, RegistryEventKind};
use crate::registry::snapshot::{DriftEntry, LabSnapshot};
use crate::registry::{LabRegistry, RegistryChannel};
use crate::resource::{Resource, ResourceIdentity, ResourceKind, ResourceState, ResourceVersion};

struct Lab {
    resources: HashMap<ResourceIdentity, Resource>,
    expected_names: Vec<String>,
    last_drift: Vec<DriftEntry>,
}

impl Default for Lab {
    fn default() -> Self {
        Self {
            resources: HashMap::new(),
            expected_names: Vec::new(),
            last_drift: Vec::new(),
        }
    }
}

/// An in-memory implementation sufficient for tests and a single-process
/// deployment, per §6 ("an in-memory map plus pub/sub is sufficient for
/// tests"). A durable backend can implement the same [`LabRegistry`] trait
/// without callers changing.
#[derive(Default)]
pub struct InMemoryLabRegistry {
    labs: Mutex<HashMap<String, Lab>>,
    all: UnboundedBroadcast<RegistryEvent>,
    per_lab: Mutex<HashMap<String, UnboundedBroadcast<RegistryEvent>>>,
    per_kind: Mutex<HashMap<String, UnboundedBroadcast<RegistryEvent>>>,
}

impl InMemoryLabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, event: RegistryEvent) {
        self.all.broadcast(event.clone());
        if let Some(lab_id) = &event.lab_id {
            let mut per_lab = self.per_lab.lock().expect("lock poisoned");
            per_lab
                .entry(lab_id.clone())
                .or_default()
                .broadcast(event.clone());
        }
    }

    fn publish_with_kind(&self, event: RegistryEvent, kind: ResourceKind) {
        self.publish(event.clone());
        let key = format!("{kind:?}");
        let mut per_kind = self.per_kind.lock().expect("lock poisoned");
        per_kind.entry(key).or_default().broadcast(event);
    }
}

impl LabRegistry for InMemoryLabRegistry {
    fn register(&self, resource: Resource) -> Result<ResourceVersion, CoreError> {
        let lab_id = resource.lab_id.clone();
        let kind = resource.kind;
        let mut labs = self.labs.lock().expect("lock poisoned");
        let lab_key = lab_id.clone().unwrap_or_default();
        let lab = labs.entry(lab_key).or_default();

        let (event_kind, version) = match lab.resources.get(&resource.identity) {
            Some(existing) => (RegistryEventKind::Updated, existing.version.next()),
            None => (RegistryEventKind::Created, ResourceVersion::initial()),
        };

        let mut stored = resource;
        stored.version = version;
        stored.last_seen = Utc::now();
        let identity = stored.identity.clone();
        labs.entry(lab_id.clone().unwrap_or_default())
            .or_default()
            .resources
            .insert(identity.clone(), stored);
        drop(labs);

        self.publish_with_kind(
            RegistryEvent::new(event_kind, identity, lab_id, version, serde_json::Value::Null),
            kind,
        );
        Ok(version)
    }

    fn mark_missing(&self, identity: &ResourceIdentity, grace: Duration) -> Result<(), CoreError> {
        let mut labs = self.labs.lock().expect("lock poisoned");
        for lab in labs.values_mut() {
            if let Some(resource) = lab.resources.get_mut(identity) {
                let age = Utc::now() - resource.last_seen;
                let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
                if resource.state != ResourceState::Unknown && age > grace {
                    resource.state = ResourceState::Unknown;
                    resource.version = resource.version.next();
                    let lab_id = resource.lab_id.clone();
                    let version = resource.version;
                    let kind = resource.kind;
                    drop(labs);
                    self.publish_with_kind(
                        RegistryEvent::new(
                            RegistryEventKind::StateChanged,
                            identity.clone(),
                            lab_id,
                            version,
                            serde_json::Value::Null,
                        ),
                        kind,
                    );
                    return Ok(());
                }
                return Ok(());
            }
        }
        Err(CoreError::ResourceMissing(identity.clone()))
    }

    fn get(&self, identity: &ResourceIdentity) -> Option<Resource> {
        let labs = self.labs.lock().expect("lock poisoned");
        labs.values().find_map(|lab| lab.resources.get(identity).cloned())
    }

    fn resources_for_lab(&self, lab_id: &str) -> Vec<Resource> {
        let labs = self.labs.lock().expect("lock poisoned");
        labs.get(lab_id)
            .map(|lab| lab.resources.values().cloned().collect())
            .unwrap_or_default()
    }

    fn resources_for_backend(&self, backend_kind: &str, backend_instance_id: &str) -> Vec<Resource> {
        let labs = self.labs.lock().expect("lock poisoned");
        labs.values()
            .flat_map(|lab| lab.resources.values())
            .filter(|r| r.identity.backend_kind == backend_kind && r.identity.backend_instance_id == backend_instance_id)
            .cloned()
            .collect()
    }

    fn set_expected_names(&self, lab_id: &str, names: Vec<String>) {
        let mut labs = self.labs.lock().expect("lock poisoned");
        labs.entry(lab_id.to_string()).or_default().expected_names = names;
    }

    fn record_drift(&self, lab_id: &str, drifts: Vec<DriftEntry>) -> LabSnapshot {
        let mut labs = self.labs.lock().expect("lock poisoned");
        let lab = labs.entry(lab_id.to_string()).or_default();
        let previous = lab.last_drift.clone();
        lab.last_drift = drifts.clone();

        let expected_running = lab
            .expected_names
            .iter()
            .all(|name| {
                lab.resources
                    .values()
                    .any(|r| r.name == *name && r.state == ResourceState::Running)
            });
        drop(labs);

        let resolved: Vec<&DriftEntry> = previous
            .iter()
            .filter(|old| !drifts.iter().any(|new| new.node_name == old.node_name && new.kind == old.kind))
            .collect();

        for entry in &drifts {
            if !previous.iter().any(|old| old.node_name == entry.node_name && old.kind == entry.kind) {
                self.publish(RegistryEvent::new(
                    RegistryEventKind::DriftDetected,
                    ResourceIdentity::new("registry", "drift", &entry.node_name),
                    Some(lab_id.to_string()),
                    ResourceVersion::initial(),
                    serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
                ));
            }
        }
        for entry in resolved {
            self.publish(RegistryEvent::new(
                RegistryEventKind::DriftResolved,
                ResourceIdentity::new("registry", "drift", &entry.node_name),
                Some(lab_id.to_string()),
                ResourceVersion::initial(),
                serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
            ));
        }

        LabSnapshot {
            lab_id: lab_id.to_string(),
            drifts,
            all_expected_running: expected_running,
        }
    }

    fn snapshot(&self, lab_id: &str) -> LabSnapshot {
        let labs = self.labs.lock().expect("lock poisoned");
        let lab = labs.get(lab_id);
        let drifts = lab.map(|l| l.last_drift.clone()).unwrap_or_default();
        let all_expected_running = lab
            .map(|l| {
                l.expected_names.iter().all(|name| {
                    l.resources
                        .values()
                        .any(|r| r.name == *name && r.state == ResourceState::Running)
                })
            })
            .unwrap_or(true);

        LabSnapshot {
            lab_id: lab_id.to_string(),
            drifts,
            all_expected_running,
        }
    }

    fn subscribe(&self, channel: RegistryChannel) -> EventConsumer<RegistryEvent> {
        match channel {
            RegistryChannel::All => EventConsumer::from(self.all.subscribe()),
            RegistryChannel::Lab(lab_id) => {
                let mut per_lab = self.per_lab.lock().expect("lock poisoned");
                EventConsumer::from(per_lab.entry(lab_id).or_default().subscribe())
            }
            RegistryChannel::Kind(kind) => {
                let mut per_kind = self.per_kind.lock().expect("lock poisoned");
                EventConsumer::from(per_kind.entry(format!("{kind:?}")).or_default().subscribe())
            }
        }
    }
}
