use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use tracing::info;

use crate::error::PostError;
use crate::worker::Worker;

use super::WorkerPool;

impl WorkerPool {
    /// Bring one more worker online, restarting an idle slot if there is one.
    pub fn add_worker(&self) -> Result<Arc<Worker>, PostError> {
        let _resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let live = self.live.load(Ordering::Acquire);

        let worker = match workers.get(live) {
            Some(idle) => Arc::clone(idle),
            None => {
                let worker = Arc::new(Worker::new(
                    format!("post-worker-{}", workers.len()),
                    self.config.queue_capacity,
                    Arc::clone(&self.registry),
                    Arc::clone(&self.sink),
                    self.config.drain_quantum(),
                )?);
                workers.push(Arc::clone(&worker));
                worker
            }
        };

        worker.start()?;
        self.live.store(live + 1, Ordering::Release);
        info!(worker = %worker.name(), live = live + 1, "worker added");
        Ok(worker)
    }

    pub fn add_workers(&self, count: usize) -> Result<(), PostError> {
        for _ in 0..count {
            self.add_worker()?;
        }
        Ok(())
    }

    /// Stop the most recently added live worker after draining its queue.
    ///
    /// Returns the number of tasks run by the final drain, or `None` when no
    /// worker is live.
    pub fn remove_worker(&self) -> Option<usize> {
        let _resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let live = self.live.load(Ordering::Acquire);
        if live == 0 {
            return None;
        }
        // Shrink first so new submissions stop choosing this worker.
        self.live.store(live - 1, Ordering::Release);
        let worker = Arc::clone(&self.read_workers()[live - 1]);
        let drained = worker.stop();
        info!(worker = %worker.name(), live = live - 1, "worker removed");
        Some(drained)
    }

    /// Stop every live worker in reverse order, then the dedicated worker.
    /// Idle slots are drained too, in case a submission raced a removal.
    ///
    /// Every task accepted before this call has run when it returns.
    /// Returns the number of tasks run by the final drains.
    pub fn shutdown(&self) -> usize {
        let _resize = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let live = self.live.swap(0, Ordering::AcqRel);
        let workers: Vec<_> = self.read_workers().clone();

        let mut drained = 0;
        for worker in workers.iter().rev() {
            drained += worker.stop();
        }
        if let Some(dedicated) = &self.dedicated {
            drained += dedicated.stop();
        }
        info!(workers = live, drained, "worker pool shut down");
        drained
    }
}
