//! The secret oracle (§6): a synchronous `get_secret(name) -> bytes`. The
//! core never stores raw credentials; it asks this trait for them at the
//! point of use and never logs what comes back.

use crate::error::CoreError;

pub trait SecretOracle: Send + Sync {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>, CoreError>;
}

/// Resolves secrets from process environment variables, uppercased with a
/// fixed prefix. Suitable for on-host deployments where secrets are injected
/// by the process supervisor; cloud-backed oracles are expected to be added
/// as separate implementations without changing this trait.
pub struct EnvSecretOracle {
    prefix: String,
}

impl EnvSecretOracle {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for EnvSecretOracle {
    fn default() -> Self {
        Self::new("RANGECTL_SECRET_")
    }
}

impl SecretOracle for EnvSecretOracle {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>, CoreError> {
        let key = format!("{}{}", self.prefix, name.to_uppercase());
        std::env::var(&key)
            .map(|v| v.into_bytes())
            .map_err(|_| CoreError::AuthFailed(format!("no secret named '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_secret_from_prefixed_env_var() {
        let oracle = EnvSecretOracle::new("TEST_SECRET_");
        // Safety: test runs single-threaded within this process's env access.
        unsafe {
            std::env::set_var("TEST_SECRET_DB_PASSWORD", "hunter2");
        }
        assert_eq!(
            oracle.get_secret("db_password").unwrap(),
            b"hunter2".to_vec()
        );
        unsafe {
            std::env::remove_var("TEST_SECRET_DB_PASSWORD");
        }
    }

    #[test]
    fn missing_secret_is_auth_failed() {
        let oracle = EnvSecretOracle::default();
        assert!(matches!(
            oracle.get_secret("does-not-exist"),
            Err(CoreError::AuthFailed(_))
        ));
    }
}
