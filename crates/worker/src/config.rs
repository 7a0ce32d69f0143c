//! Worker settings read from the environment.

use std::time::Duration;

use jobline_scheduler::{QueueConfig, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub batch_concurrency: usize,
    pub report_concurrency: usize,
    pub email_concurrency: usize,
    pub webhook_concurrency: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub batch_pacing: Duration,
    /// Watchdog for every queue; `None` disables it.
    pub job_timeout: Option<Duration>,
    pub job_retention: Duration,
    pub clean_interval: Duration,
    /// Finished jobs kept per queue and status before the oldest are dropped.
    pub history_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 1,
            report_concurrency: 2,
            email_concurrency: 3,
            webhook_concurrency: 3,
            retry_base: Duration::from_millis(1_000),
            retry_max: Duration::from_millis(60_000),
            batch_pacing: Duration::from_millis(2_000),
            job_timeout: None,
            job_retention: Duration::from_secs(86_400),
            clean_interval: Duration::from_secs(3_600),
            history_limit: 1_000,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Missing or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Duration {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .map_or(default, Duration::from_millis)
        };
        let secs = |key: &str, default: Duration| -> Duration {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .map_or(default, Duration::from_secs)
        };
        let count = |key: &str, default: usize| -> usize {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            batch_concurrency: count("BATCH_CONCURRENCY", defaults.batch_concurrency),
            report_concurrency: count("REPORT_CONCURRENCY", defaults.report_concurrency),
            email_concurrency: count("EMAIL_CONCURRENCY", defaults.email_concurrency),
            webhook_concurrency: count("WEBHOOK_CONCURRENCY", defaults.webhook_concurrency),
            retry_base: millis("RETRY_BASE_MS", defaults.retry_base),
            retry_max: millis("RETRY_MAX_MS", defaults.retry_max),
            batch_pacing: millis("BATCH_PACING_MS", defaults.batch_pacing),
            job_timeout: lookup("JOB_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
            job_retention: secs("JOB_RETENTION_SECS", defaults.job_retention),
            clean_interval: secs("CLEAN_INTERVAL_SECS", defaults.clean_interval),
            history_limit: count("HISTORY_LIMIT", defaults.history_limit),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_base, self.retry_max)
    }

    /// Queue settings for a given concurrency, sharing the retry policy and watchdog.
    pub fn queue(&self, concurrency: usize) -> QueueConfig {
        let config = QueueConfig::default()
            .with_concurrency(concurrency)
            .with_retry(self.retry());
        match self.job_timeout {
            Some(timeout) => config.with_job_timeout(timeout),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), WorkerConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("BATCH_CONCURRENCY", "4"),
            ("RETRY_BASE_MS", "250"),
            ("JOB_TIMEOUT_SECS", "30"),
            ("HISTORY_LIMIT", " 10 "),
        ]);

        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.retry_base, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.report_concurrency, 2);
    }

    #[test]
    fn garbage_and_zero_timeout_fall_back() {
        let config = from_pairs(&[("EMAIL_CONCURRENCY", "many"), ("JOB_TIMEOUT_SECS", "0")]);

        assert_eq!(config.email_concurrency, 3);
        assert_eq!(config.job_timeout, None);
    }

    #[test]
    fn queue_settings_carry_the_watchdog() {
        let config = from_pairs(&[("JOB_TIMEOUT_SECS", "5")]);
        let queue = config.queue(2);

        assert_eq!(queue.concurrency, 2);
        assert_eq!(queue.job_timeout, Some(Duration::from_secs(5)));
        assert_eq!(queue.retry, config.retry());
    }
}
