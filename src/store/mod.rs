//! Persisted control-plane state (§6): Lab Intents, Mission Specs, and the
//! Exploit Library. Resource state itself is derived from polling and
//! deliberately has no store here — the registry is its own authority.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::deploy::LabIntent;
use crate::error::CoreError;
use crate::mission::{Exploit, MissionSpec};

pub trait LabIntentStore: Send + Sync {
    fn create(&self, intent: LabIntent) -> Result<(), CoreError>;
    fn get(&self, lab_id: &str) -> Option<LabIntent>;
    fn list(&self) -> Vec<LabIntent>;
    fn delete(&self, lab_id: &str) -> Result<(), CoreError>;
}

/// Persists mission specs (target, exploits, probes) created via `mission
/// create` so `mission start` can inject against the real target the
/// operator registered instead of a hardcoded one.
pub trait MissionSpecStore: Send + Sync {
    fn create(&self, spec: MissionSpec) -> Result<(), CoreError>;
    fn get(&self, mission_id: &str) -> Option<MissionSpec>;
}

#[derive(Default)]
pub struct InMemoryMissionSpecStore {
    specs: Mutex<HashMap<String, MissionSpec>>,
}

impl MissionSpecStore for InMemoryMissionSpecStore {
    fn create(&self, spec: MissionSpec) -> Result<(), CoreError> {
        let mut locked = self.specs.lock().expect("lock poisoned");
        if locked.contains_key(&spec.mission_id) {
            return Err(CoreError::NameCollision(spec.mission_id));
        }
        locked.insert(spec.mission_id.clone(), spec);
        Ok(())
    }

    fn get(&self, mission_id: &str) -> Option<MissionSpec> {
        self.specs.lock().expect("lock poisoned").get(mission_id).cloned()
    }
}

#[derive(Default)]
pub struct InMemoryLabIntentStore {
    intents: Mutex<HashMap<String, LabIntent>>,
}

impl LabIntentStore for InMemoryLabIntentStore {
    fn create(&self, intent: LabIntent) -> Result<(), CoreError> {
        let mut locked = self.intents.lock().expect("lock poisoned");
        if locked.contains_key(&intent.lab_id) {
            return Err(CoreError::NameCollision(intent.lab_id));
        }
        locked.insert(intent.lab_id.clone(), intent);
        Ok(())
    }

    fn get(&self, lab_id: &str) -> Option<LabIntent> {
        self.intents.lock().expect("lock poisoned").get(lab_id).cloned()
    }

    fn list(&self) -> Vec<LabIntent> {
        self.intents.lock().expect("lock poisoned").values().cloned().collect()
    }

    fn delete(&self, lab_id: &str) -> Result<(), CoreError> {
        self.intents
            .lock()
            .expect("lock poisoned")
            .remove(lab_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ResourceMissing(crate::resource::ResourceIdentity::new("lab", "intent-store", lab_id)))
    }
}

/// A named collection of reusable exploits, keyed by name. `init` seeds a
/// process with a small built-in set (§6's "seed exploit library"); operators
/// add to it by editing the persisted YAML out of process.
#[derive(Default)]
pub struct ExploitLibrary {
    exploits: Mutex<HashMap<String, Exploit>>,
}

impl ExploitLibrary {
    pub fn add(&self, exploit: Exploit) {
        self.exploits.lock().expect("lock poisoned").insert(exploit.name.clone(), exploit);
    }

    pub fn get(&self, name: &str) -> Option<Exploit> {
        self.exploits.lock().expect("lock poisoned").get(name).cloned()
    }

    pub fn list(&self) -> Vec<Exploit> {
        self.exploits.lock().expect("lock poisoned").values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.exploits.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{LabIntent, NodeKind, NodeSpec};

    fn sample_intent(lab_id: &str) -> LabIntent {
        LabIntent {
            lab_id: lab_id.to_string(),
            mission_id: None,
            nodes: vec![NodeSpec {
                kind: NodeKind::Gateway,
                template_ref: "tpl-gw".to_string(),
                name: "gw".to_string(),
                cpu: 1,
                memory_mb: 512,
                disks_gb: vec![10],
                network_edges: Vec::new(),
            }],
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = InMemoryLabIntentStore::default();
        store.create(sample_intent("lab-1")).unwrap();
        assert!(store.get("lab-1").is_some());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn create_twice_is_name_collision() {
        let store = InMemoryLabIntentStore::default();
        store.create(sample_intent("lab-1")).unwrap();
        assert!(matches!(store.create(sample_intent("lab-1")), Err(CoreError::NameCollision(_))));
    }

    #[test]
    fn delete_missing_lab_is_resource_missing() {
        let store = InMemoryLabIntentStore::default();
        assert!(matches!(store.delete("nope"), Err(CoreError::ResourceMissing(_))));
    }
}
