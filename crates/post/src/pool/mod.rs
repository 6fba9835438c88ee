//! Worker pool -- a resizable set of workers sharing one registry.
//!
//! Split into focused submodules:
//! - `core`: WorkerPool struct, constructor, registration and accessors
//! - `membership`: growing, shrinking and shutting down the live set
//! - `submit`: load-balanced and dedicated submission

mod core;
mod membership;
mod submit;
#[cfg(test)]
mod tests;

pub use self::core::WorkerPool;
