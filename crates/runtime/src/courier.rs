use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{Callable, Clock, ErrorSink};
use courier_post::{Dispatcher, JobGroups, PostError, Task, WorkerPool};
use courier_timer::{Callout, Crontab, TimerHeap};
use tracing::info;

use crate::config::{to_values, CourierConfig};
use crate::error::RuntimeError;

type Schedulers = (Arc<TimerHeap>, Option<Arc<Crontab>>, Option<Arc<Callout>>);

/// One process-wide scheduling substrate.
///
/// The pool and the job groups share a single registration table, so a
/// function registered once can be submitted to either. The timer heap, the
/// crontab and the callout all dispatch through the job groups.
pub struct Courier {
    pool: Arc<WorkerPool>,
    jobs: Arc<JobGroups>,
    timers: Arc<TimerHeap>,
    crontab: Option<Arc<Crontab>>,
    callout: Option<Arc<Callout>>,
    stopped: AtomicBool,
}

impl Courier {
    /// Build every subsystem and start the background loops.
    pub fn start(
        config: CourierConfig,
        sink: Arc<dyn ErrorSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuntimeError> {
        let pool = Arc::new(WorkerPool::new(config.pool.clone(), Arc::clone(&sink))?);
        let jobs = Arc::new(JobGroups::new(config.jobs.clone(), pool.registry(), sink));
        let (timers, crontab, callout) = match Self::start_schedulers(&config, jobs.clone(), clock) {
            Ok(schedulers) => schedulers,
            Err(e) => {
                pool.shutdown();
                jobs.close_all();
                return Err(e);
            }
        };

        info!(
            workers = pool.live(),
            crontab = crontab.is_some(),
            callout = callout.is_some(),
            "courier started"
        );
        Ok(Self {
            pool,
            jobs,
            timers,
            crontab,
            callout,
            stopped: AtomicBool::new(false),
        })
    }

    /// Build the callout before the tick thread starts, so a failure here
    /// leaves no scheduler running.
    fn start_schedulers(
        config: &CourierConfig,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Schedulers, RuntimeError> {
        let callout = config
            .timer
            .callout_enabled
            .then(|| Callout::new(config.timer.callout_capacity, Arc::clone(&dispatcher)))
            .transpose()?
            .map(Arc::new);

        let timers = Arc::new(TimerHeap::new(&config.timer, Arc::clone(&dispatcher), Arc::clone(&clock)));
        timers.start()?;

        let crontab = config.timer.crontab_enabled.then(|| {
            let crontab = Arc::new(Crontab::new(dispatcher, Arc::clone(&clock)));
            crontab.start(&timers);
            crontab
        });
        if let Some(callout) = &callout {
            callout.start(&timers, clock.as_ref());
        }
        Ok((timers, crontab, callout))
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn jobs(&self) -> &Arc<JobGroups> {
        &self.jobs
    }

    pub fn timers(&self) -> &Arc<TimerHeap> {
        &self.timers
    }

    pub fn crontab(&self) -> Option<&Arc<Crontab>> {
        self.crontab.as_ref()
    }

    pub fn callout(&self) -> Option<&Arc<Callout>> {
        self.callout.as_ref()
    }

    /// Register a function for name-addressed submission.
    pub fn register(&self, name: impl Into<String>, callable: Callable) -> Result<(), PostError> {
        self.pool.register(name, callable)
    }

    /// Schedule the `[[crontab]]` and `[[timers]]` entries of `config`.
    ///
    /// Every referenced function must already be registered. Returns the
    /// number of jobs scheduled.
    pub fn schedule_configured(&self, config: &CourierConfig) -> Result<usize, RuntimeError> {
        let registry = self.pool.registry();
        let unknown = |function: &str| {
            RuntimeError::Config(format!("scheduled function '{function}' is not registered"))
        };

        let mut scheduled = 0;
        for job in &config.crontab {
            if !registry.contains(&job.function) {
                return Err(unknown(&job.function));
            }
            let crontab = self.crontab.as_ref().ok_or_else(|| {
                RuntimeError::Config("crontab entries configured but the crontab is disabled".into())
            })?;
            let task = Task::new(job.function.as_str(), to_values(&job.args)?);
            crontab.add(&job.pattern, job.memo.clone(), task)?;
            scheduled += 1;
        }
        for job in &config.timers {
            if !registry.contains(&job.function) {
                return Err(unknown(&job.function));
            }
            let task = Task::new(job.function.as_str(), to_values(&job.args)?);
            self.timers.add_timer(Duration::from_millis(job.every_ms), task);
            scheduled += 1;
        }
        info!(scheduled, "configured jobs scheduled");
        Ok(scheduled)
    }

    /// Stop the schedulers, drain and stop the pool, then close every job
    /// group. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(crontab) = &self.crontab {
            crontab.stop();
        }
        if let Some(callout) = &self.callout {
            callout.stop();
        }
        self.timers.stop();
        let drained = self.pool.shutdown();
        let groups = self.jobs.close_all();
        info!(drained, groups, "courier shut down");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
