//! Shared building blocks for the courier crates.
//!
//! - [`value`]: opaque argument values passed to tasks
//! - [`callable`]: type-erased callables with strict and dynamic calling conventions
//! - [`report`]: structured failure records and the sinks that receive them
//! - [`clock`]: wall-clock abstraction used by the schedulers
//! - [`config`]: `.env` loading and environment helpers

pub mod callable;
pub mod clock;
pub mod config;
pub mod error;
pub mod report;
pub mod value;

pub use callable::{Callable, IntoDynamic, IntoReturn};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CallError;
pub use report::{ErrorRecord, ErrorSink, LogSink, MemorySink};
pub use value::{FromValue, Value};
