use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the background task processor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    /// Number of worker loops pulling from the queue
    pub max_workers: usize,

    /// Maximum number of queued (not yet running) tasks; 0 = unlimited
    pub max_queue_size: usize,

    /// Timeout applied to tasks submitted without an explicit one (milliseconds)
    pub default_timeout_ms: u64,

    /// Retries granted to tasks submitted without an explicit limit
    pub default_max_retries: u32,

    /// How often the sweep loop looks for finished tasks (seconds)
    pub cleanup_interval_secs: u64,

    /// How long a terminal task stays visible before the sweep drops it (seconds)
    pub retention_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_queue_size: 100,
            default_timeout_ms: 30 * 60 * 1000, // 30 minutes
            default_max_retries: 3,
            cleanup_interval_secs: 3600,
            retention_secs: 24 * 3600,
        }
    }
}

impl ProcessorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 || self.max_workers > 256 {
            return Err(anyhow!(
                "max_workers must be between 1 and 256, got {}",
                self.max_workers
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(anyhow!("default_timeout_ms must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.default_timeout(), Duration::from_secs(1800));
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.retention(), Duration::from_secs(86400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = ProcessorConfig::default().with_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cleanup_interval_never_zero() {
        let config = ProcessorConfig::default().with_cleanup_interval(Duration::ZERO);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
    }
}
