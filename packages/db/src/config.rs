//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use lifecycle_core::RetryConfig;
use storage::{StorageConfig, StorageError, env};

/// Settings for the store, the queue and the lifecycle service.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    /// How long a claim stays exclusive without an ack or release.
    pub lease_ttl: Duration,
    /// How long a writer waits for a record's lock.
    pub lock_timeout: Duration,
    /// Reload-and-reapply rounds after a version conflict.
    pub conflict_retries: u32,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            lease_ttl: Duration::from_secs(300),
            lock_timeout: Duration::from_millis(5000),
            conflict_retries: 3,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Config rooted at `root`, everything else default.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(root),
            ..Default::default()
        }
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_FS_ROOT` (default: `./data/jobs`)
    /// - `JOB_LEASE_TTL_SECS` (default: 300)
    /// - `JOB_LOCK_TIMEOUT_MS` (default: 5000)
    /// - `JOB_CONFLICT_RETRIES` (default: 3)
    /// - `JOB_MAX_ATTEMPTS` (default: 3, values below 1 become 1)
    /// - `JOB_BACKOFF_BASE_SECS` (default: 5)
    /// - `JOB_BACKOFF_CAP_SECS` (default: 300)
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = Self::default();
        let retry_defaults = RetryConfig::default();

        let lease_ttl = env::parse::<u64>("JOB_LEASE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_ttl);
        if lease_ttl.is_zero() {
            return Err(StorageError::InvalidConfig(
                "JOB_LEASE_TTL_SECS must be greater than zero".to_string(),
            ));
        }

        let retry = RetryConfig::new(
            env::parse::<i64>("JOB_MAX_ATTEMPTS")?
                .unwrap_or(i64::from(retry_defaults.max_attempts)),
            env::parse::<f64>("JOB_BACKOFF_BASE_SECS")?.unwrap_or(retry_defaults.backoff_base_secs),
            env::parse::<f64>("JOB_BACKOFF_CAP_SECS")?.unwrap_or(retry_defaults.backoff_cap_secs),
        );

        Ok(Self {
            storage: StorageConfig::from_env()?,
            lease_ttl,
            lock_timeout: env::parse::<u64>("JOB_LOCK_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            conflict_retries: env::parse::<u32>("JOB_CONFLICT_RETRIES")?
                .unwrap_or(defaults.conflict_retries),
            retry,
        })
    }

    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
