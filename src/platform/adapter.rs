//! The Platform Adapter capability trait (§4.1): the single interface every
//! backend implements, so the rest of the control plane never subclasses or
//! downcasts by backend — a lesson pulled from §9's note on avoiding a
//! dynamic-dispatch pyramid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::network::NetworkLease;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOp {
    On,
    Off,
    Reset,
}

#[derive(Debug, Clone, Default)]
pub struct CloneSpec {
    pub template_ref: String,
    pub name: String,
    pub cpu: u32,
    pub memory_mb: u64,
    pub disks_gb: Vec<u64>,
    pub nics: Vec<String>,
    pub userdata: Option<String>,
    /// Idempotency key namespaced by the owning deploy or mission (§4.1, §6).
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub secret: Vec<u8>,
}

/// Identical signature across backends. Every operation must be idempotent
/// where the underlying backend permits it, keyed by the caller-supplied
/// `request_id` carried on the relevant input type.
pub trait PlatformAdapter: Send + Sync {
    fn backend_kind(&self) -> &str;
    fn backend_instance_id(&self) -> &str;

    /// Returns a native id; guaranteed the native object exists before return.
    fn clone_from_template(&self, spec: &CloneSpec) -> Result<String, CoreError>;

    /// Returns once the backend reports the transition issued, not necessarily
    /// complete.
    fn set_power(&self, native_id: &str, op: PowerOp) -> Result<(), CoreError>;

    /// Returns the observed IP, or fails with `Timeout`.
    fn wait_for_liveness(&self, native_id: &str, deadline: Duration) -> Result<String, CoreError>;

    /// Returns once the backend confirms removal; idempotent on already-missing.
    fn delete(&self, native_id: &str, force: bool) -> Result<(), CoreError>;

    /// A finite, not-restartable sequence of observed resources (§9: exposed
    /// as a lazy sequence rather than a generator, since Rust has no coroutines
    /// here — the caller drains the returned `Vec` or abandons it wholesale).
    fn list_resources(&self, kind_filter: Option<&str>) -> Result<Vec<Resource>, CoreError>;

    /// Returns once the interface is live.
    fn attach_network(&self, native_id: &str, lease: &NetworkLease) -> Result<(), CoreError>;

    fn exec_command(
        &self,
        native_id: &str,
        credential: &Credential,
        command: &str,
    ) -> Result<ExecResult, CoreError>;
}
