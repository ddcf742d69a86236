//! Operator configuration
//!
//! Everything a controller needs is passed to its constructor through
//! [`ControllerConfig`]. Environment variables are only read once, by the
//! binary, through [`OperatorConfig::from_env`].

use std::time::Duration;

use crate::error::{Error, Result};

/// Default queue name for both controllers
pub const DEFAULT_QUEUE_NAME: &str = "BACKSTORE";

/// Environment variable overriding the Backup queue name
pub const BACKUP_QUEUE_ENV: &str = "BACKSTORE_BACKUP_QUEUE";

/// Environment variable overriding the Restore queue name
pub const RESTORE_QUEUE_ENV: &str = "BACKSTORE_RESTORE_QUEUE";

/// Environment variable overriding the metrics port
pub const METRICS_PORT_ENV: &str = "BACKSTORE_METRICS_PORT";

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Interval between readiness checks of a dependent resource
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long a dependent resource may take to become ready
pub const POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Completion poll timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: POLL_TIMEOUT,
        }
    }
}

/// Per-key exponential backoff used when a key is retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// Configuration handed to a single controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Queue identifier, used for log and metric grouping only
    pub queue_name: String,
    pub poll: PollPolicy,
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            poll: PollPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Config with a custom queue name and default policies
    pub fn named(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }
}

/// Process-wide configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub backup: ControllerConfig,
    pub restore: ControllerConfig,
    pub metrics_port: u16,
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_name = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string())
        };

        let metrics_port = match lookup(METRICS_PORT_ENV) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                Error::config(format!("Invalid {} '{}': {}", METRICS_PORT_ENV, raw, e))
            })?,
            None => DEFAULT_METRICS_PORT,
        };

        Ok(Self {
            backup: ControllerConfig::named(queue_name(BACKUP_QUEUE_ENV)),
            restore: ControllerConfig::named(queue_name(RESTORE_QUEUE_ENV)),
            metrics_port,
        })
    }
}
