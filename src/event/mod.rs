//! The in-process event bus.
//!
//! A crossbeam-backed publisher/consumer pair (`channel`) plus a
//! multi-subscriber broadcaster (`broadcaster`) used wherever more than one
//! consumer needs the same stream, and a cancellation primitive
//! (`cancellation`) threaded through every long-running worker.
//!
//! On top of those primitives this module defines the domain event types that
//! travel the bus: [`RegistryEvent`] (§4.3), [`DeployEvent`] and [`MissionEvent`].

pub mod broadcaster;
pub mod cancellation;
pub mod channel;

use crate::resource::{ResourceIdentity, ResourceVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The enumeration of registry change events from §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEventKind {
    Created,
    Updated,
    Deleted,
    StateChanged,
    DriftDetected,
    DriftResolved,
    ReconcileStart,
    ReconcileComplete,
    ReconcileFailed,
    AgentHeartbeat,
}

/// The wire envelope carried on every registry channel (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub event_type: RegistryEventKind,
    pub resource_id: ResourceIdentity,
    pub lab_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub version: ResourceVersion,
    pub data: serde_json::Value,
}

impl RegistryEvent {
    pub fn new(
        event_type: RegistryEventKind,
        resource_id: ResourceIdentity,
        lab_id: Option<String>,
        version: ResourceVersion,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            resource_id,
            lab_id,
            timestamp: Utc::now(),
            version,
            data,
        }
    }
}

/// Lifecycle events published by the Deployment Engine, consumed by the CLI /
/// any observer wanting progress without polling the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    Started { deploy_id: String, lab_id: String },
    TaskStateChanged { deploy_id: String, node_name: String, state: String },
    Completed { deploy_id: String, outcome: String },
    Failed { deploy_id: String, error: String },
}

/// Lifecycle events published by the Mission Engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    StateChanged { mission_id: String, state: String },
    Progress { mission_id: String, percent: u8 },
    StepCompleted { mission_id: String, exploit: String, outcome: String },
}

/// Application-wide control events (today: graceful shutdown), mirroring the
/// teacher's `ApplicationEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEvent {
    StopRequested,
}
