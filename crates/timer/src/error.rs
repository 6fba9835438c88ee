use chrono::NaiveDateTime;
use courier_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("callout delay must be at least one second")]
    ZeroDelay,

    #[error("callout intake is full ({occupancy} queued)")]
    CalloutFull { occupancy: u64 },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("failed to spawn tick thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("crontab '{expr}' has {found} fields, expected 5")]
    FieldCount { expr: String, found: usize },

    #[error("{field}: '{value}' is not a number")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field}: {value} is outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field}: range {start}-{end} is reversed")]
    InvalidRange {
        field: &'static str,
        start: u32,
        end: u32,
    },

    #[error("{field}: invalid step '{step}'")]
    InvalidStep { field: &'static str, step: String },

    #[error("{field}: expression selects no values")]
    EmptyField { field: &'static str },

    #[error("local time {0} does not exist in the current time zone")]
    InvalidLocalTime(NaiveDateTime),
}
