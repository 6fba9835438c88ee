//! Time-based scheduling.
//!
//! - [`heap`]: deadline-ordered one-shot and repeating timers
//! - [`crontab`]: calendar patterns indexed on a minute-of-day wheel
//! - [`callout`]: cheap second-granularity delayed calls
//!
//! None of them run user code. Everything that fires is handed to a
//! [`Dispatcher`](courier_post::Dispatcher) under a reserved job group.

pub mod callout;
pub mod crontab;
pub mod error;
pub mod heap;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use callout::{Callout, CalloutHandle};
pub use crontab::{CronPattern, Crontab, CrontabHandle};
pub use error::{CronError, TimerError};
pub use heap::{TimerHandle, TimerHeap};
pub use types::TimerConfig;
