//! The Mission Engine (Reaper) and Validator (WhiteKnight) (§4.8, §4.9).

pub mod engine;
pub mod exploit;
pub mod playbook_runner;
pub mod state;
pub mod validator;

pub use engine::{MissionConfig, MissionEngine, MissionResult, MissionSpec, MissionTarget};
pub use exploit::{Exploit, ExploitBody, ExploitType, OsFamily};
pub use playbook_runner::{ExternalPlaybookRunner, PlaybookOutcome, PlaybookRunner, PlaybookStatus};
pub use state::{MissionState, StepLogEntry, StepOutcome};
pub use validator::{Probe, ProbeOutcome, ValidationResult, Validator};
