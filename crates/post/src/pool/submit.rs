use std::sync::atomic::Ordering;
use std::sync::Arc;

use courier_core::Value;
use rand::Rng;
use tracing::debug;

use crate::error::PostError;
use crate::task::{Target, Task};

use super::WorkerPool;

impl WorkerPool {
    /// Submit a dynamically invoked task to a random live worker.
    pub fn submit(&self, target: impl Into<Target>, args: Vec<Value>) -> Result<(), PostError> {
        self.submit_task(Task::new(target, args))
    }

    /// Submit a task invoked through the fixed calling convention.
    pub fn submit_strict(
        &self,
        target: impl Into<Target>,
        args: Vec<Value>,
    ) -> Result<(), PostError> {
        self.submit_task(Task::new(target, args).strict())
    }

    /// Submit a prepared task to a uniformly random live worker.
    ///
    /// With no live worker the task is dropped and `Ok` is returned; the
    /// drop is counted in [`PoolMetrics::dropped`](crate::PoolMetrics).
    pub fn submit_task(&self, task: Task) -> Result<(), PostError> {
        let live = self.live.load(Ordering::Acquire);
        let worker = if live == 0 {
            None
        } else {
            let index = rand::thread_rng().gen_range(0..live);
            self.read_workers().get(index).map(Arc::clone)
        };

        match worker {
            Some(worker) => worker.put(task),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(function = %task.target, "no live worker, task dropped");
                Ok(())
            }
        }
    }

    /// Submit to the dedicated worker. Tasks submitted here run one at a
    /// time in submission order.
    pub fn submit_to_dedicated(&self, task: Task) -> Result<(), PostError> {
        let worker = self.dedicated.as_ref().ok_or(PostError::NoDedicatedWorker)?;
        if !worker.is_running() {
            return Err(PostError::WorkerStopped(worker.name().to_string()));
        }
        worker.put(task)
    }
}
