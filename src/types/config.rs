//! Configuration structures.
//!
//! Options are a closed set; anything the runtime consumes is declared here
//! and checked by [`CourierOptions::validate`] before any component is
//! constructed. Validation fails fast and always names the offending field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::{Error, Result};

fn default_key_prefix() -> String {
    "courier:".to_string()
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_concurrent_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 5
}

fn default_job_execution_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_job_retention_period() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_true() -> bool {
    true
}

/// Runtime options consumed by the coordinator, bridge, engine and facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierOptions {
    /// Use the single-process in-memory coordinator instead of the
    /// store-backed distributed one.
    #[serde(default)]
    pub use_in_memory_coordination: bool,

    /// Connection string for the remote store. Required unless
    /// `use_in_memory_coordination` is set.
    #[serde(default)]
    pub remote_store_endpoint: String,

    /// Prefix applied to every key and channel the distributed coordinator
    /// touches in the remote store.
    #[serde(default = "default_key_prefix")]
    pub remote_key_prefix: String,

    /// How long a pending task may wait for its completion before the
    /// waiter is failed with a timeout.
    #[serde(default = "default_task_timeout", with = "humantime_serde")]
    pub default_task_timeout: Duration,

    /// Additional handler attempts after the first failure. Zero means a
    /// single attempt.
    #[serde(default)]
    pub default_retry_budget: u32,

    /// Concurrency cap for the in-process job engine.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Wall-clock bound on a single job execution on a worker.
    #[serde(default = "default_job_execution_timeout", with = "humantime_serde")]
    pub job_execution_timeout: Duration,

    /// How long finished job records are retained before pruning.
    #[serde(default = "default_job_retention_period", with = "humantime_serde")]
    pub job_retention_period: Duration,

    /// Period of the coordinator sweeper and related housekeeping.
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Emit log events to the console subscriber.
    #[serde(default = "default_true")]
    pub enable_console_logging: bool,

    /// Lower the default log filter to debug.
    #[serde(default)]
    pub enable_detailed_logging: bool,

    /// Drop finished job records immediately when the job succeeded.
    #[serde(default)]
    pub auto_delete_successful_jobs: bool,
}

impl Default for CourierOptions {
    fn default() -> Self {
        Self {
            use_in_memory_coordination: false,
            remote_store_endpoint: String::new(),
            remote_key_prefix: default_key_prefix(),
            default_task_timeout: default_task_timeout(),
            default_retry_budget: 0,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_execution_timeout: default_job_execution_timeout(),
            job_retention_period: default_job_retention_period(),
            cleanup_interval: default_cleanup_interval(),
            enable_console_logging: true,
            enable_detailed_logging: false,
            auto_delete_successful_jobs: false,
        }
    }
}

impl CourierOptions {
    /// Options preset for single-process deployments (in-memory
    /// coordination, no remote store).
    pub fn in_memory() -> Self {
        Self {
            use_in_memory_coordination: true,
            ..Self::default()
        }
    }

    /// Validate the option set.
    ///
    /// Every rejection names the failing field so misconfiguration is
    /// diagnosable from the error alone. No component may be constructed
    /// from an option set that fails validation.
    pub fn validate(&self) -> Result<()> {
        if !self.use_in_memory_coordination && self.remote_store_endpoint.is_empty() {
            return Err(Error::invalid_argument(
                "remote_store_endpoint must be set when use_in_memory_coordination is false",
            ));
        }
        if self.remote_key_prefix.is_empty() {
            return Err(Error::invalid_argument(
                "remote_key_prefix must not be empty",
            ));
        }
        if self.default_task_timeout.is_zero() {
            return Err(Error::invalid_argument(
                "default_task_timeout must be greater than zero",
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(Error::invalid_argument(
                "max_concurrent_jobs must be greater than zero",
            ));
        }
        if self.job_execution_timeout.is_zero() {
            return Err(Error::invalid_argument(
                "job_execution_timeout must be greater than zero",
            ));
        }
        if self.job_retention_period.is_zero() {
            return Err(Error::invalid_argument(
                "job_retention_period must be greater than zero",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::invalid_argument(
                "cleanup_interval must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Sweep period for the in-memory coordinator: the task timeout split
    /// four ways, never longer than one minute.
    pub fn sweep_period(&self) -> Duration {
        (self.default_task_timeout / 4).min(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_in_memory() {
        let options = CourierOptions::in_memory();
        assert!(options.validate().is_ok());
        assert_eq!(options.remote_key_prefix, "courier:");
        assert_eq!(options.default_task_timeout, Duration::from_secs(1800));
        assert_eq!(options.default_retry_budget, 0);
        assert!(options.enable_console_logging);
        assert!(!options.enable_detailed_logging);
        assert!(!options.auto_delete_successful_jobs);
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let options = CourierOptions::default();
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("remote_store_endpoint"));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let options = CourierOptions {
            remote_key_prefix: String::new(),
            ..CourierOptions::in_memory()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("remote_key_prefix"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        for field in [
            "default_task_timeout",
            "job_execution_timeout",
            "job_retention_period",
            "cleanup_interval",
        ] {
            let mut options = CourierOptions::in_memory();
            match field {
                "default_task_timeout" => options.default_task_timeout = Duration::ZERO,
                "job_execution_timeout" => options.job_execution_timeout = Duration::ZERO,
                "job_retention_period" => options.job_retention_period = Duration::ZERO,
                _ => options.cleanup_interval = Duration::ZERO,
            }
            let err = options.validate().unwrap_err();
            assert!(err.to_string().contains(field), "field {}", field);
        }
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let options = CourierOptions {
            max_concurrent_jobs: 0,
            ..CourierOptions::in_memory()
        };
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_sweep_period_is_capped() {
        let mut options = CourierOptions::in_memory();
        options.default_task_timeout = Duration::from_secs(3600);
        assert_eq!(options.sweep_period(), Duration::from_secs(60));

        options.default_task_timeout = Duration::from_millis(200);
        assert_eq!(options.sweep_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_durations_deserialize_humantime() {
        let options: CourierOptions = serde_json::from_str(
            r#"{
                "use_in_memory_coordination": true,
                "default_task_timeout": "50ms",
                "cleanup_interval": "1m"
            }"#,
        )
        .unwrap();
        assert_eq!(options.default_task_timeout, Duration::from_millis(50));
        assert_eq!(options.cleanup_interval, Duration::from_secs(60));
        assert!(options.validate().is_ok());
    }
}
