//! Crontab scheduling on a minute-of-day wheel.
//!
//! Entries are compiled into bitmasks and indexed under every
//! `hour * 60 + minute` slot they can fire in. The once-a-minute check only
//! looks at the current slot and re-validates the full pattern (day, month
//! and weekday) for each candidate.

mod core;
mod entry;
pub(crate) mod pattern;


pub use self::core::{Crontab, CrontabHandle};
pub use self::entry::CronEntry;
pub use self::pattern::{CronPattern, WHEEL_SLOTS};
