//! Configuration for the taskswarm engine.
//!
//! Scheduler constructors take the typed configs below. For embedding
//! applications, [`Config::from_env`] reads them from the environment:
//! - `TASKSWARM_DB_PATH` - Optional. Task store path. Defaults to `tasks.db`.
//! - `TASKSWARM_WORKERS` - Optional. Pool worker count. Defaults to `4`.
//! - `TASKSWARM_POLL_INTERVAL_MS` - Optional. Idle claim poll interval.
//!   Defaults to `500`.
//! - `TASKSWARM_STOP_WHEN_EMPTY` - Optional. `true`/`false`. Defaults to
//!   `false` (workers keep polling for new tasks).
//! - `TASKSWARM_MAX_RETRIES` - Optional. Guarantee-loop retry bound.
//!   Defaults to `3`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Configuration for the worker pool scheduler.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent worker loops. Must be at least 1.
    pub workers: usize,

    /// How long an idle worker waits before re-polling the store. The
    /// wake-on-enqueue channel usually short-circuits this; the interval is
    /// the bounded-latency fallback for externally created tasks.
    pub poll_interval: Duration,

    /// Terminate worker loops once the store has no pending tasks, instead
    /// of polling forever.
    pub stop_when_empty: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(500),
            stop_when_empty: false,
        }
    }
}

/// Configuration for the guarantee (retry-until-verified) scheduler.
#[derive(Debug, Clone)]
pub struct GuaranteeConfig {
    /// Maximum number of retries after the first attempt; the loop performs
    /// at most `max_retries + 1` full staged executions.
    pub max_retries: u32,

    /// Names of catalog checks that must pass for completion. Empty means
    /// the catalog's own required flags are used unchanged.
    pub required_checks: Vec<String>,

    /// In strict mode every check must pass, required or not.
    pub strict: bool,
}

impl Default for GuaranteeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            required_checks: Vec::new(),
            strict: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite task store.
    pub db_path: PathBuf,
    pub pool: PoolConfig,
    pub guarantee: GuaranteeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tasks.db"),
            pool: PoolConfig::default(),
            guarantee: GuaranteeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("TASKSWARM_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(workers) = parse_var::<usize>("TASKSWARM_WORKERS")? {
            if workers == 0 {
                return Err(ConfigError::InvalidValue(
                    "TASKSWARM_WORKERS".into(),
                    "must be at least 1".into(),
                ));
            }
            config.pool.workers = workers;
        }
        if let Some(ms) = parse_var::<u64>("TASKSWARM_POLL_INTERVAL_MS")? {
            config.pool.poll_interval = Duration::from_millis(ms);
        }
        if let Some(stop) = parse_var::<bool>("TASKSWARM_STOP_WHEN_EMPTY")? {
            config.pool.stop_when_empty = stop;
        }
        if let Some(retries) = parse_var::<u32>("TASKSWARM_MAX_RETRIES")? {
            config.guarantee.max_retries = retries;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.pool.poll_interval, Duration::from_millis(500));
        assert!(!config.pool.stop_when_empty);
        assert_eq!(config.guarantee.max_retries, 3);
        assert!(!config.guarantee.strict);
    }
}
