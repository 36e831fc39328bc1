//! Queue and manager configuration
//!
//! Defaults match the reference deployment; every knob can be overridden
//! from the environment.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, QueueError};

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
/// Largest buffer a tokio broadcast channel accepts
pub const MAX_EVENT_CAPACITY: usize = usize::MAX >> 1;

/// Per-queue settings, fixed when the queue is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Maximum number of jobs in flight at once
    pub concurrency: usize,
    /// Attempts a job gets before it is marked failed
    pub max_attempts: u32,
    /// Buffer size of the event channel
    pub event_capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl QueueOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(QueueError::InvalidConfig(format!(
                "event_capacity must be at most {MAX_EVENT_CAPACITY}"
            )));
        }
        Ok(())
    }
}

/// Registry-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How often the sweeper runs (env: DEALFLOW_SWEEP_INTERVAL_SECS)
    pub sweep_interval: Duration,
    /// Age after which terminal jobs are evicted (env: DEALFLOW_RETENTION_HOURS)
    pub retention: ChronoDuration,
    /// Event buffer for queues created without explicit options (env: DEALFLOW_EVENT_CAPACITY)
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: ChronoDuration::hours(DEFAULT_RETENTION_HOURS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ManagerConfig {
    /// Load from environment, falling back to defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sweep_interval = match parse_var::<u64>("DEALFLOW_SWEEP_INTERVAL_SECS")? {
            Some(0) => return Err(invalid("DEALFLOW_SWEEP_INTERVAL_SECS", 0)),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.sweep_interval,
        };

        let retention = match parse_var::<i64>("DEALFLOW_RETENTION_HOURS")? {
            Some(hours) if hours < 0 => return Err(invalid("DEALFLOW_RETENTION_HOURS", hours)),
            Some(hours) => ChronoDuration::try_hours(hours)
                .ok_or_else(|| invalid("DEALFLOW_RETENTION_HOURS", hours))?,
            None => defaults.retention,
        };

        let event_capacity = match parse_var::<usize>("DEALFLOW_EVENT_CAPACITY")? {
            Some(capacity) if capacity == 0 || capacity > MAX_EVENT_CAPACITY => {
                return Err(invalid("DEALFLOW_EVENT_CAPACITY", capacity))
            }
            Some(capacity) => capacity,
            None => defaults.event_capacity,
        };

        Ok(Self {
            sweep_interval,
            retention,
            event_capacity,
        })
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: ChronoDuration) -> Self {
        self.retention = retention;
        self
    }

    /// Options used by [`crate::QueueManager::get_queue_default`]
    pub fn default_queue_options(&self) -> QueueOptions {
        QueueOptions::default().with_event_capacity(self.event_capacity)
    }
}

fn invalid(var: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<V: FromStr>(var: &str) -> Result<Option<V>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = QueueOptions::default();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.max_attempts, 3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(QueueOptions::default().with_concurrency(0).validate().is_err());
        assert!(QueueOptions::default().with_max_attempts(0).validate().is_err());
        assert!(QueueOptions::default().with_event_capacity(0).validate().is_err());
        assert!(QueueOptions::default()
            .with_event_capacity(usize::MAX)
            .validate()
            .is_err());
    }

    #[test]
    fn test_manager_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.retention, ChronoDuration::hours(24));
    }

    // All env manipulation lives in one test so parallel tests don't race.
    #[test]
    fn test_manager_from_env() {
        env::set_var("DEALFLOW_SWEEP_INTERVAL_SECS", "120");
        env::set_var("DEALFLOW_RETENTION_HOURS", "6");
        env::remove_var("DEALFLOW_EVENT_CAPACITY");

        let config = ManagerConfig::from_env().unwrap();
        assert_eq!(config.sweep_interval, Duration::from_secs(120));
        assert_eq!(config.retention, ChronoDuration::hours(6));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);

        env::set_var("DEALFLOW_RETENTION_HOURS", "a day");
        let err = ManagerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DEALFLOW_RETENTION_HOURS"));

        for hours in ["-5", "9999999999999999"] {
            env::set_var("DEALFLOW_RETENTION_HOURS", hours);
            let err = ManagerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains(hours));
        }

        env::set_var("DEALFLOW_RETENTION_HOURS", "0");
        assert_eq!(
            ManagerConfig::from_env().unwrap().retention,
            ChronoDuration::zero()
        );

        let too_large = usize::MAX.to_string();
        for capacity in ["0", too_large.as_str()] {
            env::set_var("DEALFLOW_EVENT_CAPACITY", capacity);
            let err = ManagerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("DEALFLOW_EVENT_CAPACITY"));
        }

        env::remove_var("DEALFLOW_SWEEP_INTERVAL_SECS");
        env::remove_var("DEALFLOW_RETENTION_HOURS");
        env::remove_var("DEALFLOW_EVENT_CAPACITY");
    }
}
