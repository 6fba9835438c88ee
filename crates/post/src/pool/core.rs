use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use courier_core::{Callable, ErrorSink};
use tracing::info;

use crate::error::PostError;
use crate::metrics::PoolMetrics;
use crate::registry::Registry;
use crate::types::PoolConfig;
use crate::worker::Worker;

pub(super) const DEDICATED_WORKER_NAME: &str = "post-dedicated";

/// A resizable pool of [`Worker`]s plus an optional dedicated worker.
///
/// Workers `0..live` accept submissions. Slots past `live` belong to
/// workers that were removed; they are kept idle and restarted by the next
/// [`WorkerPool::add_worker`].
pub struct WorkerPool {
    pub(super) config: PoolConfig,
    /// Callable table shared by every worker.
    pub(super) registry: Arc<Registry>,
    pub(super) sink: Arc<dyn ErrorSink>,
    /// All worker slots, in the order they were created.
    pub(super) workers: RwLock<Vec<Arc<Worker>>>,
    /// Number of leading slots that are running.
    pub(super) live: AtomicUsize,
    /// Serializes add/remove/shutdown.
    pub(super) resize: Mutex<()>,
    /// Worker for submissions that must run in order.
    pub(super) dedicated: Option<Arc<Worker>>,
    /// Submissions dropped because no worker was live.
    pub(super) dropped: AtomicU64,
}

impl WorkerPool {
    /// Create the pool and start `initial_workers` workers, plus the
    /// dedicated worker when enabled.
    pub fn new(config: PoolConfig, sink: Arc<dyn ErrorSink>) -> Result<Self, PostError> {
        let registry = Arc::new(Registry::new());
        let dedicated = if config.dedicated_worker {
            Some(Arc::new(Worker::new(
                DEDICATED_WORKER_NAME,
                config.queue_capacity,
                Arc::clone(&registry),
                Arc::clone(&sink),
                config.drain_quantum(),
            )?))
        } else {
            None
        };

        let pool = Self {
            registry,
            sink,
            workers: RwLock::new(Vec::new()),
            live: AtomicUsize::new(0),
            resize: Mutex::new(()),
            dedicated,
            dropped: AtomicU64::new(0),
            config,
        };
        if let Err(e) = pool.start_initial_workers() {
            // Stop whatever did start, the dedicated worker included.
            pool.shutdown();
            return Err(e);
        }

        info!(
            workers = pool.live(),
            queue_capacity = pool.config.queue_capacity,
            dedicated = pool.dedicated.is_some(),
            "worker pool started"
        );
        Ok(pool)
    }

    fn start_initial_workers(&self) -> Result<(), PostError> {
        if let Some(dedicated) = &self.dedicated {
            dedicated.start()?;
        }
        self.add_workers(self.config.initial_workers)
    }

    /// Register a function callable by name from any worker of this pool.
    pub fn register(&self, name: impl Into<String>, callable: Callable) -> Result<(), PostError> {
        self.registry.register(name, callable)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of live workers.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Number of worker slots, live or idle.
    pub fn size(&self) -> usize {
        self.read_workers().len()
    }

    pub fn dedicated(&self) -> Option<&Arc<Worker>> {
        self.dedicated.as_ref()
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.read_workers().iter().map(|w| w.snapshot()).collect(),
            live: self.live(),
            dedicated: self.dedicated.as_ref().map(|w| w.snapshot()),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(super) fn read_workers(&self) -> RwLockReadGuard<'_, Vec<Arc<Worker>>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }
}
