//! Bounded lock-free ring queue.
//!
//! [`RingQueue`] is the transport between producers and the worker that
//! drains them. It has a fixed power-of-two capacity and coordinates
//! entirely through atomic position counters and per-slot generation
//! numbers; no lock is ever taken.

pub mod error;
pub mod ring;

pub use error::QueueError;
pub use ring::{RejectReason, Rejected, RingQueue, MAX_CAPACITY};
