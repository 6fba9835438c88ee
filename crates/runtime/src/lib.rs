//! Process-level wiring for the courier scheduling substrate.
//!
//! [`Courier`] owns one worker pool, the named job groups, the timer heap and
//! the two schedulers layered on it (crontab and callout). Library code
//! should receive a `Courier` (or one of its parts) explicitly; [`global`]
//! exists only for the process boundary.

pub mod config;
pub mod courier;
pub mod error;
pub mod global;

pub use config::{CourierConfig, CronJobConfig, TimerJobConfig};
pub use courier::Courier;
pub use error::RuntimeError;
