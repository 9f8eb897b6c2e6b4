use std::env;

/// Environment variable for failure record retention (days).
pub const RETENTION_ENV_VAR: &str = "PRSHIP_FAILURE_RETENTION_DAYS";

/// Default retention period in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Configuration for failure record storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureStoreConfig {
    /// Retention period in days (0 disables pruning).
    pub retention_days: u64,
}

impl FailureStoreConfig {
    pub fn new(retention_days: u64) -> Self {
        Self { retention_days }
    }

    /// Build config from the environment, falling back to `retention_days`.
    pub fn from_env_or(retention_days: u64) -> Self {
        let retention_days = env::var(RETENTION_ENV_VAR)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(retention_days);
        Self { retention_days }
    }

    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self::from_env_or(DEFAULT_RETENTION_DAYS)
    }
}

impl Default for FailureStoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
