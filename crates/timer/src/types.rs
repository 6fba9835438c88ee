use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Period of the timer heap's tick loop.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Shortest delay a timer can be scheduled with.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Capacity of the callout intake queue.
    #[serde(default = "default_callout_capacity")]
    pub callout_capacity: u64,

    #[serde(default = "default_true")]
    pub crontab_enabled: bool,

    #[serde(default = "default_true")]
    pub callout_enabled: bool,
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_min_interval_ms() -> u64 {
    10
}

fn default_callout_capacity() -> u64 {
    65_536
}

fn default_true() -> bool {
    true
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            callout_capacity: default_callout_capacity(),
            crontab_enabled: true,
            callout_enabled: true,
        }
    }
}

impl TimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}
