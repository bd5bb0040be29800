//! The categorical error taxonomy from spec §7.
//!
//! Subsystems get their own error enum only once they need a variant that
//! doesn't fit this taxonomy (a DAG cycle description, say); until then they
//! return `CoreError` directly rather than growing a wrapper enum whose sole
//! job is to `#[from]` straight back into this one.

use crate::resource::ResourceIdentity;
use crate::event::channel::EventPublisherError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("resource missing: {0:?}")]
    ResourceMissing(ResourceIdentity),

    #[error("name collision: {0}")]
    NameCollision(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transition busy: {0:?}")]
    TransitionBusy(ResourceIdentity),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("network lease pool exhausted")]
    PoolExhausted,

    #[error("drift detected for lab {lab_id}: {detail}")]
    DriftDetected { lab_id: String, detail: String },

    #[error("exploit `{exploit}` is incompatible with observed OS `{observed_os}`")]
    IncompatibleOS { exploit: String, observed_os: String },

    #[error("operation cancelled")]
    CancelRequested,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("event bus error: {0}")]
    EventBus(#[from] EventPublisherError),
}

impl CoreError {
    /// Errors in this set are recoverable and, per §7's propagation policy,
    /// worth retrying with backoff up to a caller-supplied budget.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::BackendUnreachable(_) | CoreError::TransitionBusy(_)
        )
    }
}
