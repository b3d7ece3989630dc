//! Lifecycle engine configuration

use crate::auth::CredentialId;
use std::time::Duration;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Key service configuration
#[derive(Debug, Clone)]
pub struct KeysConfig {
    /// Upper bound on waiting for a namespace or admission lock
    pub lock_timeout: Duration,
    /// Id to seed the super key with; random when unset
    pub super_key: Option<CredentialId>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            super_key: None,
        }
    }
}

impl KeysConfig {
    /// Read `REGISTRY_LOCK_TIMEOUT_MS` and `REGISTRY_SUPER_KEY`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = std::env::var("REGISTRY_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.lock_timeout = Duration::from_millis(ms);
        }

        config.super_key = std::env::var("REGISTRY_SUPER_KEY")
            .ok()
            .and_then(|s| CredentialId::parse(&s).ok());

        config
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
