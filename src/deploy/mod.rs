//! The Deployment Engine (§4.7): executes a Lab Intent as a dependency-ordered
//! task set — gateway to completion first, then bounded-parallel tenants.

pub mod engine;
pub mod intent;
pub mod task;

pub use engine::{DeployOutcome, DeployTerminalState, DeploymentConfig, DeploymentEngine};
pub use intent::{LabIntent, NodeKind, NodeSpec};
pub use task::{TaskOutcome, TaskState};
