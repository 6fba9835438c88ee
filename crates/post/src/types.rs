use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Ring queue capacity per worker (rounded up to a power of two).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: u64,

    /// Workers started with the pool.
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    /// Drain loop period in milliseconds.
    #[serde(default = "default_drain_quantum_ms")]
    pub drain_quantum_ms: u64,

    /// Start a dedicated worker for ordered submissions.
    #[serde(default = "default_dedicated_worker")]
    pub dedicated_worker: bool,
}

fn default_queue_capacity() -> u64 {
    65_536
}

fn default_initial_workers() -> usize {
    4
}

fn default_drain_quantum_ms() -> u64 {
    10
}

fn default_dedicated_worker() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            initial_workers: default_initial_workers(),
            drain_quantum_ms: default_drain_quantum_ms(),
            dedicated_worker: default_dedicated_worker(),
        }
    }
}

impl PoolConfig {
    pub fn drain_quantum(&self) -> Duration {
        Duration::from_millis(self.drain_quantum_ms)
    }
}

/// Named job group configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobGroupConfig {
    /// Bound of each group's channel; producers block beyond it.
    #[serde(default = "default_group_queue_len")]
    pub queue_len: usize,

    /// How long `close_all` waits for group loops to exit.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_group_queue_len() -> usize {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for JobGroupConfig {
    fn default() -> Self {
        Self {
            queue_len: default_group_queue_len(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl JobGroupConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
