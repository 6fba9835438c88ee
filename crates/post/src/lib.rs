//! Task execution: workers, the worker pool and named job groups.
//!
//! - [`task`]: the task envelope submitted for execution
//! - [`registry`]: name → callable table shared by a pool's workers
//! - [`execute`]: running one task with failure isolation
//! - [`worker`]: a ring-queue-backed worker and its drain loop
//! - [`pool`]: resizable pool of workers plus a dedicated worker
//! - [`jobs`]: lazily created named groups backed by blocking channels

pub mod error;
pub mod execute;
pub mod jobs;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod task;
pub mod types;
pub mod worker;

pub use error::PostError;
pub use execute::{run_task, Outcome};
pub use jobs::{Dispatcher, GroupWorker, JobGroups, CALLOUT_GROUP, CRONTAB_GROUP, TIMER_GROUP};
pub use metrics::{PoolMetrics, WorkerSnapshot};
pub use pool::WorkerPool;
pub use registry::Registry;
pub use task::{Continuation, Target, Task};
pub use types::{JobGroupConfig, PoolConfig};
pub use worker::Worker;
