//! Tuning options for the worker pool and the remote task poller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{VmsError, VmsResult};

/// Environment variable that overrides the pool capacity.
pub const POOL_CAPACITY_ENV: &str = "VMSCTL_POOL_CAPACITY";

/// Capacity used when the processor count cannot be determined.
pub const FALLBACK_CAPACITY: usize = 4;

/// Number of processors available to this process.
pub fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_CAPACITY)
}

/// Worker pool and job runner options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum number of work items executing at once.
    pub capacity: usize,
    /// How often `wait` re-checks job completion.
    pub poll_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Defaults, with the capacity taken from `VMSCTL_POOL_CAPACITY` when set.
    pub fn from_env() -> VmsResult<Self> {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var(POOL_CAPACITY_ENV) {
            options.capacity = raw.trim().parse().map_err(|_| {
                VmsError::Config(format!("{POOL_CAPACITY_ENV}='{raw}' is not a positive integer"))
            })?;
        }
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> VmsResult<()> {
        if self.capacity == 0 {
            return Err(VmsError::InvalidPoolSize(self.capacity));
        }
        if self.poll_interval.is_zero() {
            return Err(VmsError::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Remote task poller options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerOptions {
    /// Pause before each status query.
    pub interval: Duration,
    /// Total attempts for one status query before the poll fails.
    pub max_attempts: u32,
    /// Flat pause between attempts; the channel is reopened after it.
    pub retry_delay: Duration,
    /// Issue a cleanup call for finished tasks whose type supports it.
    pub cleanup: bool,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            cleanup: false,
        }
    }
}

impl PollerOptions {
    /// Fast preset: short intervals, for local or simulated servers.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_attempts: 5,
            retry_delay: Duration::from_millis(100),
            cleanup: false,
        }
    }

    /// Patient preset: slower polling for busy management servers.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            cleanup: false,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn validate(&self) -> VmsResult<()> {
        if self.max_attempts == 0 {
            return Err(VmsError::Config("max_attempts must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(VmsError::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let opts = PoolOptions::default();
        assert!(opts.capacity >= 1);
        assert_eq!(opts.poll_interval, Duration::from_secs(1));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = PoolOptions::default().with_capacity(0).validate().unwrap_err();
        assert!(matches!(err, VmsError::InvalidPoolSize(0)));
    }

    #[test]
    fn capacity_from_env() {
        std::env::set_var(POOL_CAPACITY_ENV, "3");
        let opts = PoolOptions::from_env().unwrap();
        assert_eq!(opts.capacity, 3);

        std::env::set_var(POOL_CAPACITY_ENV, "many");
        assert!(matches!(PoolOptions::from_env(), Err(VmsError::Config(_))));

        std::env::set_var(POOL_CAPACITY_ENV, "0");
        assert!(matches!(PoolOptions::from_env(), Err(VmsError::InvalidPoolSize(0))));
        std::env::remove_var(POOL_CAPACITY_ENV);
    }

    #[test]
    fn poller_defaults_and_presets() {
        let opts = PollerOptions::default();
        assert_eq!(opts.interval, Duration::from_millis(500));
        assert_eq!(opts.max_attempts, 5);
        assert!(!opts.cleanup);

        assert!(PollerOptions::fast().interval < opts.interval);
        assert!(PollerOptions::patient().interval > opts.interval);
        assert!(PollerOptions::default().with_max_attempts(0).validate().is_err());
    }
}
