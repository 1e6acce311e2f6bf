//! Worker pool configuration.

use std::time::Duration;

use storage::{StorageError, env};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of worker actors.
    pub concurrency: usize,
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    /// Upper bound on a single handler run.
    pub job_timeout: Duration,
    /// Worker ids are `<prefix>-<n>`.
    pub worker_prefix: String,
    /// How often the supervisor logs queue stats.
    pub tick_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            job_timeout: Duration::from_secs(240),
            worker_prefix: "worker".to_string(),
            tick_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Build a config from environment variables.
    ///
    /// - `WORKER_CONCURRENCY` (default: 4)
    /// - `WORKER_POLL_INTERVAL_MS` (default: 250)
    /// - `JOB_TIMEOUT_SECS` (default: 240)
    /// - `WORKER_PREFIX` (default: `worker`)
    pub fn from_env() -> Result<Self, StorageError> {
        let defaults = Self::default();

        let concurrency = env::parse::<usize>("WORKER_CONCURRENCY")?.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(StorageError::InvalidConfig(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            concurrency,
            poll_interval: env::parse::<u64>("WORKER_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval)
                .max(Duration::from_millis(1)),
            job_timeout: env::parse::<u64>("JOB_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            worker_prefix: env::var("WORKER_PREFIX").unwrap_or(defaults.worker_prefix),
            tick_interval: defaults.tick_interval,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_worker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_prefix = prefix.into();
        self
    }

    pub fn worker_id(&self, n: usize) -> String {
        format!("{}-{}", self.worker_prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_keep_values_usable() {
        let config = WorkerConfig::default()
            .with_concurrency(0)
            .with_poll_interval(Duration::ZERO)
            .with_worker_prefix("host-a");

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.worker_id(3), "host-a-3");
    }
}
