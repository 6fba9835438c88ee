//! A single worker: one ring queue, one drain loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use courier_core::{Callable, ErrorSink, Value};
use courier_queue::RingQueue;
use tracing::{debug, info, warn};

use crate::error::PostError;
use crate::execute::{run_task, Outcome};
use crate::metrics::WorkerSnapshot;
use crate::registry::Registry;
use crate::task::{Target, Task};

/// Executes tasks from its own [`RingQueue`] on a background thread.
///
/// Producers call [`Worker::put`] from any thread. The loop started by
/// [`Worker::start`] drains the queue in batches once per quantum.
pub struct Worker {
    name: String,
    queue: RingQueue<Task>,
    registry: Arc<Registry>,
    sink: Arc<dyn ErrorSink>,
    /// Reused batch buffer, grown to the largest batch seen.
    scratch: Mutex<Vec<Task>>,
    quantum: Duration,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    executed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        capacity: u64,
        registry: Arc<Registry>,
        sink: Arc<dyn ErrorSink>,
        quantum: Duration,
    ) -> Result<Self, PostError> {
        let queue = RingQueue::with_capacity(capacity)?;
        Ok(Self {
            name: name.into(),
            scratch: Mutex::new(Vec::new()),
            queue,
            registry,
            sink,
            quantum,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of tasks waiting in the queue.
    pub fn pending(&self) -> u64 {
        self.queue.quantity()
    }

    /// Register a callable in the table this worker resolves names against.
    pub fn register(&self, name: impl Into<String>, callable: Callable) -> Result<(), PostError> {
        self.registry.register(name, callable)
    }

    /// Enqueue a task. Fails only when the queue is full.
    pub fn put(&self, mut task: Task) -> Result<(), PostError> {
        loop {
            match self.queue.put(task) {
                Ok(_) => return Ok(()),
                Err(rejected) if rejected.is_full() => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(PostError::QueueFull {
                        worker: self.name.clone(),
                        occupancy: rejected.occupancy(),
                    });
                }
                Err(rejected) => {
                    task = rejected.into_inner();
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn put_task(
        &self,
        target: impl Into<Target>,
        strict: bool,
        args: Vec<Value>,
    ) -> Result<(), PostError> {
        let mut task = Task::new(target, args);
        task.strict = strict;
        self.put(task)
    }

    /// Execute one batch of up to `capacity` queued tasks on the calling thread.
    pub fn drain(&self) -> usize {
        self.drain_up_to(self.queue.capacity() as usize)
    }

    /// Execute everything queued at the time of the call, across as many
    /// batches as it takes.
    pub fn drain_backlog(&self) -> usize {
        let backlog = self.queue.quantity() as usize;
        let mut done = 0;
        while done < backlog {
            let n = self.drain_up_to(backlog - done);
            if n == 0 {
                if self.queue.is_empty() {
                    break;
                }
                thread::yield_now();
                continue;
            }
            done += n;
        }
        done
    }

    fn drain_up_to(&self, limit: usize) -> usize {
        // Take the buffer so a task that drains this worker cannot deadlock.
        let mut batch = std::mem::take(&mut *self.lock_scratch());
        self.queue.gets(&mut batch, limit);
        let count = batch.len();

        for task in batch.drain(..) {
            let counter = match run_task(task, &self.registry, self.sink.as_ref(), &self.name) {
                Outcome::Completed => &self.executed,
                Outcome::Failed => &self.failed,
                Outcome::Skipped => &self.skipped,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let mut scratch = self.lock_scratch();
        if scratch.capacity() < batch.capacity() {
            *scratch = batch;
        }
        count
    }

    fn lock_scratch(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.scratch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain loop. Returns once [`Worker::stop`] clears the running flag.
    pub fn run(&self) {
        debug!(worker = %self.name, "drain loop started");
        while self.is_running() {
            let started = Instant::now();
            let n = self.drain();
            if n > 0 {
                debug!(worker = %self.name, tasks = n, "drained batch");
            }
            match self.quantum.checked_sub(started.elapsed()) {
                Some(rest) if !rest.is_zero() => thread::sleep(rest),
                _ => thread::yield_now(),
            }
        }
        debug!(worker = %self.name, "drain loop exited");
    }

    /// Spawn the drain loop on a thread named after the worker.
    pub fn start(self: &Arc<Self>) -> Result<(), PostError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let worker = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(worker = %self.name, "worker started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(PostError::Spawn(e))
            }
        }
    }

    /// Stop the loop, then run the whole remaining backlog.
    ///
    /// Returns the number of tasks run by the final drain. Safe to call from
    /// a task running on this worker; the join is skipped in that case.
    pub fn stop(&self) -> usize {
        self.running.store(false, Ordering::Release);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(worker = %self.name, "drain loop panicked");
            }
        }
        let drained = self.drain_backlog();
        info!(worker = %self.name, drained, "worker stopped");
        drained
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.name.clone(),
            running: self.is_running(),
            pending: self.queue.quantity(),
            capacity: self.queue.capacity(),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
