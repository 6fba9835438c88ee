//! Named job groups.
//!
//! Each group owns a bounded blocking channel and a thread that runs its
//! tasks one by one. Groups are created on first use. Unlike the ring-queue
//! workers, a full group blocks the producer instead of rejecting.
//!
//! A task running inside a group must not append to that same group: when
//! the channel is full the send waits on the very thread that would empty it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use courier_core::ErrorSink;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::PostError;
use crate::execute::{run_task, Outcome};
use crate::registry::Registry;
use crate::task::Task;
use crate::types::JobGroupConfig;

/// Group that receives fired timers.
pub const TIMER_GROUP: &str = "timer";
/// Group that receives matched crontab entries.
pub const CRONTAB_GROUP: &str = "crontab";
/// Group that receives due callouts.
pub const CALLOUT_GROUP: &str = "callout";

/// Destination for tasks produced by the schedulers.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, group: &str, task: Task) -> Result<(), PostError>;
}

pub struct GroupWorker {
    name: String,
    tx: RwLock<Option<Sender<Task>>>,
    processed: AtomicU64,
}

impl GroupWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task, blocking while the group's channel is full.
    pub fn append_task(&self, task: Task) -> Result<(), PostError> {
        let tx = self
            .tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PostError::GroupClosed(self.name.clone()))?;
        tx.send(task)
            .map_err(|_| PostError::GroupClosed(self.name.clone()))
    }

    /// Tasks waiting in the channel.
    pub fn pending(&self) -> usize {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Sender::len)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Drop the sender; the loop exits once the channel is empty.
    fn close(&self) {
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn run(&self, rx: Receiver<Task>, registry: &Registry, sink: &dyn ErrorSink) {
        for task in rx.iter() {
            if run_task(task, registry, sink, &self.name) == Outcome::Completed {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(group = %self.name, "group loop exited");
    }
}

pub struct JobGroups {
    config: JobGroupConfig,
    registry: Arc<Registry>,
    sink: Arc<dyn ErrorSink>,
    groups: RwLock<HashMap<String, Arc<GroupWorker>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl JobGroups {
    pub fn new(config: JobGroupConfig, registry: Arc<Registry>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            config,
            registry,
            sink,
            groups: RwLock::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Return the worker for `group`, creating and starting it on first use.
    pub fn get_or_create(&self, group: &str) -> Result<Arc<GroupWorker>, PostError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PostError::GroupsClosed(group.to_string()));
        }
        if let Some(worker) = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
        {
            return Ok(Arc::clone(worker));
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(PostError::GroupsClosed(group.to_string()));
        }
        if let Some(worker) = groups.get(group) {
            return Ok(Arc::clone(worker));
        }

        let (tx, rx) = bounded(self.config.queue_len);
        let worker = Arc::new(GroupWorker {
            name: group.to_string(),
            tx: RwLock::new(Some(tx)),
            processed: AtomicU64::new(0),
        });

        let looped = Arc::clone(&worker);
        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let handle = thread::Builder::new()
            .name(format!("job-{group}"))
            .spawn(move || looped.run(rx, &registry, sink.as_ref()))?;

        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        groups.insert(group.to_string(), Arc::clone(&worker));
        info!(group, queue_len = self.config.queue_len, "job group created");
        Ok(worker)
    }

    /// Enqueue `task` on `group`, blocking while the group is full.
    pub fn append(&self, group: &str, task: Task) -> Result<(), PostError> {
        self.get_or_create(group)?.append_task(task)
    }

    /// Names of the open groups, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every group and wait for their loops to finish the queued work.
    ///
    /// Waits at most `shutdown_timeout` in total. Returns the number of loops
    /// that exited in time. Groups cannot be created afterwards.
    pub fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let groups: Vec<_> = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        for worker in &groups {
            worker.close();
        }

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = Instant::now() + self.config.shutdown_timeout();
        let current = thread::current().id();
        let mut joined = 0;
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("job group loop panicked");
                }
                joined += 1;
            } else {
                warn!(
                    thread = handle.thread().name().unwrap_or("?"),
                    "job group still running at shutdown timeout"
                );
            }
        }
        info!(groups = groups.len(), joined, "job groups closed");
        joined
    }
}

impl Dispatcher for JobGroups {
    fn dispatch(&self, group: &str, task: Task) -> Result<(), PostError> {
        self.append(group, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{args, Callable, MemorySink};
    use std::sync::mpsc;

    fn groups(queue_len: usize) -> (JobGroups, Arc<Registry>, Arc<MemorySink>) {
        let registry = Arc::new(Registry::new());
        let sink = Arc::new(MemorySink::new());
        let config = JobGroupConfig {
            queue_len,
            shutdown_timeout_ms: 2_000,
        };
        (
            JobGroups::new(config, Arc::clone(&registry), sink.clone()),
            registry,
            sink,
        )
    }

    #[test]
    fn same_name_returns_same_group() {
        let (jobs, _, _) = groups(8);
        let a = jobs.get_or_create("mail").unwrap();
        let b = jobs.get_or_create("mail").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        jobs.get_or_create("audit").unwrap();
        assert_eq!(jobs.groups(), vec!["audit".to_string(), "mail".to_string()]);
        jobs.close_all();
    }

    #[test]
    fn group_runs_tasks_in_order_and_survives_panics() {
        let (jobs, registry, sink) = groups(64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        registry
            .register("push", Callable::dynamic(move |n: i64| s.lock().unwrap().push(n)))
            .unwrap();
        registry
            .register("fail", Callable::fixed(|_| panic!("group task failed")))
            .unwrap();

        for n in 0..50i64 {
            jobs.append("work", Task::new("push", args![n])).unwrap();
            if n == 25 {
                jobs.append("work", Task::new("fail", args![]).strict()).unwrap();
            }
        }
        assert_eq!(jobs.close_all(), 1);

        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, "work");
    }

    #[test]
    fn full_group_blocks_the_producer() {
        let (jobs, registry, _) = groups(1);
        let jobs = Arc::new(jobs);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        registry
            .register(
                "hold",
                Callable::fixed(move |_| {
                    started_tx.lock().unwrap().send(()).ok();
                    release_rx.lock().unwrap().recv().ok();
                }),
            )
            .unwrap();
        registry.register("noop", Callable::fixed(|_| {})).unwrap();

        jobs.append("slow", Task::new("hold", args![]).strict()).unwrap();
        started_rx.recv().unwrap();
        // The loop is busy; this one fills the channel.
        jobs.append("slow", Task::new("noop", args![]).strict()).unwrap();

        let returned = Arc::new(AtomicBool::new(false));
        let producer = {
            let jobs = Arc::clone(&jobs);
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                jobs.append("slow", Task::new("noop", args![]).strict()).unwrap();
                returned.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!returned.load(Ordering::SeqCst), "append should block while full");

        release_tx.send(()).unwrap();
        producer.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
        jobs.close_all();
    }

    #[test]
    fn closed_groups_reject_new_work() {
        let (jobs, _, _) = groups(4);
        let worker = jobs.get_or_create("late").unwrap();
        jobs.close_all();
        assert!(jobs.is_closed());
        assert!(matches!(
            jobs.get_or_create("late"),
            Err(PostError::GroupsClosed(_))
        ));
        assert!(matches!(
            worker.append_task(Task::new("x", args![])),
            Err(PostError::GroupClosed(_))
        ));
    }

    #[test]
    fn dispatcher_routes_to_group() {
        let (jobs, registry, _) = groups(4);
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        registry
            .register(
                "hit",
                Callable::fixed(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let dispatcher: &dyn Dispatcher = &jobs;
        dispatcher
            .dispatch(TIMER_GROUP, Task::new("hit", args![]).strict())
            .unwrap();
        jobs.close_all();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
