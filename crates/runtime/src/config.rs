use std::path::Path;

use courier_core::config::env_parse;
use courier_core::Value;
use courier_post::{JobGroupConfig, PoolConfig};
use courier_queue::MAX_CAPACITY;
use courier_timer::{CronPattern, TimerConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RuntimeError;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for a [`crate::Courier`].
///
/// Parsed from `courier.toml` with support for environment variable overrides.
/// Every section is optional; missing values fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Worker pool sizing and drain behaviour.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Named job group channel sizing.
    #[serde(default)]
    pub jobs: JobGroupConfig,

    /// Timer heap, crontab and callout settings.
    #[serde(default)]
    pub timer: TimerConfig,

    /// Crontab entries scheduled at startup.
    #[serde(default)]
    pub crontab: Vec<CronJobConfig>,

    /// Repeating timers scheduled at startup.
    #[serde(default)]
    pub timers: Vec<TimerJobConfig>,
}

// ── Scheduled jobs ──────────────────────────────────────────────────

/// A `[[crontab]]` entry: run a registered function whenever `pattern` matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobConfig {
    /// Five-field crontab pattern (e.g. `"*/5 * * * *"`).
    pub pattern: String,

    /// Free-form description shown in entry listings.
    #[serde(default)]
    pub memo: String,

    /// Registered function name.
    pub function: String,

    /// Literal arguments passed on every run.
    #[serde(default)]
    pub args: Vec<toml::Value>,
}

/// A `[[timers]]` entry: run a registered function every `every_ms` milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerJobConfig {
    pub every_ms: u64,

    pub function: String,

    #[serde(default)]
    pub args: Vec<toml::Value>,
}

// ── Loading & Validation ────────────────────────────────────────────

impl CourierConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `COURIER_POOL_WORKERS` → `pool.initial_workers`
    /// - `COURIER_POOL_QUEUE_CAPACITY` → `pool.queue_capacity`
    /// - `COURIER_POOL_DRAIN_QUANTUM_MS` → `pool.drain_quantum_ms`
    /// - `COURIER_JOBS_QUEUE_LEN` → `jobs.queue_len`
    /// - `COURIER_TIMER_TICK_MS` → `timer.tick_interval_ms`
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("COURIER_POOL_WORKERS") {
            self.pool.initial_workers = v;
        }
        if let Some(v) = env_parse("COURIER_POOL_QUEUE_CAPACITY") {
            self.pool.queue_capacity = v;
        }
        if let Some(v) = env_parse("COURIER_POOL_DRAIN_QUANTUM_MS") {
            self.pool.drain_quantum_ms = v;
        }
        if let Some(v) = env_parse("COURIER_JOBS_QUEUE_LEN") {
            self.jobs.queue_len = v;
        }
        if let Some(v) = env_parse("COURIER_TIMER_TICK_MS") {
            self.timer.tick_interval_ms = v;
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Reject settings that would fail or misbehave at startup.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        self.validate_capacities()?;
        self.validate_intervals()?;
        self.validate_jobs()?;
        Ok(())
    }

    fn validate_capacities(&self) -> Result<(), RuntimeError> {
        check_capacity("pool.queue_capacity", self.pool.queue_capacity)?;
        if self.timer.callout_enabled {
            check_capacity("timer.callout_capacity", self.timer.callout_capacity)?;
        }
        if self.jobs.queue_len == 0 {
            return Err(RuntimeError::Config("jobs.queue_len must be at least 1".into()));
        }
        Ok(())
    }

    fn validate_intervals(&self) -> Result<(), RuntimeError> {
        if self.pool.drain_quantum_ms == 0 {
            return Err(RuntimeError::Config("pool.drain_quantum_ms must be positive".into()));
        }
        if self.timer.tick_interval_ms == 0 {
            return Err(RuntimeError::Config("timer.tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Check the `[[crontab]]` and `[[timers]]` entries.
    fn validate_jobs(&self) -> Result<(), RuntimeError> {
        if !self.crontab.is_empty() && !self.timer.crontab_enabled {
            return Err(RuntimeError::Config(
                "crontab entries configured but timer.crontab_enabled is false".into(),
            ));
        }
        for job in &self.crontab {
            CronPattern::parse(&job.pattern)?;
            check_job(&job.function, &job.args)?;
        }
        for job in &self.timers {
            if job.every_ms == 0 {
                return Err(RuntimeError::Config(format!(
                    "timer for '{}' has every_ms = 0",
                    job.function
                )));
            }
            check_job(&job.function, &job.args)?;
        }
        Ok(())
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        info!(
            workers = self.pool.initial_workers,
            queue_capacity = self.pool.queue_capacity,
            drain_quantum_ms = self.pool.drain_quantum_ms,
            dedicated_worker = self.pool.dedicated_worker,
            "pool config"
        );
        info!(
            queue_len = self.jobs.queue_len,
            shutdown_timeout_ms = self.jobs.shutdown_timeout_ms,
            "job group config"
        );
        info!(
            tick_ms = self.timer.tick_interval_ms,
            crontab = self.timer.crontab_enabled,
            callout = self.timer.callout_enabled,
            cron_jobs = self.crontab.len(),
            timer_jobs = self.timers.len(),
            "timer config"
        );
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn check_capacity(field: &str, capacity: u64) -> Result<(), RuntimeError> {
    if !(2..=MAX_CAPACITY).contains(&capacity) {
        return Err(RuntimeError::Config(format!(
            "{field} = {capacity} is outside 2..={MAX_CAPACITY}"
        )));
    }
    Ok(())
}

fn check_job(function: &str, args: &[toml::Value]) -> Result<(), RuntimeError> {
    if function.trim().is_empty() {
        return Err(RuntimeError::Config("scheduled job without a function name".into()));
    }
    args.iter()
        .try_for_each(|arg| to_value(arg).map(drop))
}

/// Convert a literal TOML argument into a task argument.
///
/// Tables have no task representation and are rejected.
pub(crate) fn to_value(raw: &toml::Value) -> Result<Value, RuntimeError> {
    Ok(match raw {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(f) => Value::Float(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => {
            Value::List(items.iter().map(to_value).collect::<Result<_, _>>()?)
        }
        toml::Value::Table(_) => {
            return Err(RuntimeError::Config(
                "job arguments must be scalars or arrays, not tables".into(),
            ))
        }
    })
}

pub(crate) fn to_values(raw: &[toml::Value]) -> Result<Vec<Value>, RuntimeError> {
    raw.iter().map(to_value).collect()
}
