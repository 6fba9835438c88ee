//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("capacity {requested} exceeds the maximum of {max}")]
    CapacityOverflow { requested: u64, max: u64 },

    #[error("capacity {0} is too small, need at least 2")]
    CapacityTooSmall(u64),
}
