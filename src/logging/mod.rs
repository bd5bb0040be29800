//! Process-wide tracing subscriber setup (§10.1).

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::metadata::LevelFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),
}

pub struct Logging;

impl Logging {
    /// Installs the global subscriber. Level is `info` by default, overridable
    /// per-module via `RUST_LOG` (`RUST_LOG=rangectl::mission=debug`).
    pub fn try_init() -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| LoggingError::TryInitError("unable to set the global tracing subscriber".to_string()))
    }
}
