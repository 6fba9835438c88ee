use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use courier_core::{args, Callable, MemorySink, Value};

use crate::error::PostError;
use crate::pool::WorkerPool;
use crate::task::Task;
use crate::types::PoolConfig;

fn config(workers: usize, dedicated: bool) -> PoolConfig {
    PoolConfig {
        queue_capacity: 4096,
        initial_workers: workers,
        drain_quantum_ms: 1,
        dedicated_worker: dedicated,
    }
}

fn pool(workers: usize, dedicated: bool) -> (WorkerPool, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pool = WorkerPool::new(config(workers, dedicated), sink.clone()).unwrap();
    (pool, sink)
}

fn counter(pool: &WorkerPool) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    pool.register(
        "count",
        Callable::fixed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .unwrap();
    count
}

#[test]
fn pool_starts_configured_workers() {
    let (pool, _) = pool(3, true);
    assert_eq!(pool.live(), 3);
    assert_eq!(pool.size(), 3);
    assert!(pool.dedicated().is_some());
    let metrics = pool.metrics();
    assert_eq!(metrics.workers.len(), 3);
    assert!(metrics.workers.iter().all(|w| w.running));
    pool.shutdown();
}

#[test]
fn submit_reaches_every_live_worker() {
    let (pool, _) = pool(4, false);
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let t = Arc::clone(&threads);
    pool.register(
        "where",
        Callable::fixed(move |_| {
            if let Some(name) = std::thread::current().name() {
                t.lock().unwrap().insert(name.to_string());
            }
        }),
    )
    .unwrap();

    for _ in 0..2000 {
        pool.submit_strict("where", args![]).unwrap();
    }
    pool.shutdown();

    let threads = threads.lock().unwrap();
    for i in 0..4 {
        assert!(
            threads.contains(&format!("post-worker-{i}")),
            "post-worker-{i} never ran a task: {threads:?}"
        );
    }
}

#[test]
fn shutdown_runs_every_accepted_task() {
    let (pool, _) = pool(4, true);
    let count = counter(&pool);

    let mut accepted = 0;
    for i in 0..20_000 {
        let result = if i % 10 == 0 {
            pool.submit_to_dedicated(Task::new("count", args![]))
        } else {
            pool.submit("count", args![])
        };
        if result.is_ok() {
            accepted += 1;
        }
    }
    pool.shutdown();

    assert_eq!(count.load(Ordering::SeqCst), accepted);
    assert_eq!(pool.metrics().total_pending(), 0);
}

#[test]
fn shutdown_stops_dedicated_worker_with_no_live_workers() {
    let (pool, _) = pool(0, true);
    assert_eq!(pool.live(), 0);
    assert!(pool.dedicated().unwrap().is_running());

    pool.shutdown();
    assert!(!pool.dedicated().unwrap().is_running());
    assert!(pool.metrics().workers.iter().all(|w| !w.running));
}

#[test]
fn remove_then_add_reuses_idle_slot() {
    let (pool, _) = pool(2, false);
    let count = counter(&pool);

    for _ in 0..100 {
        pool.submit("count", args![]).unwrap();
    }
    assert!(pool.remove_worker().is_some());
    assert_eq!(pool.live(), 1);
    assert_eq!(pool.size(), 2);
    assert!(!pool.metrics().workers[1].running);

    let worker = pool.add_worker().unwrap();
    assert_eq!(worker.name(), "post-worker-1");
    assert_eq!(pool.live(), 2);
    assert_eq!(pool.size(), 2);

    pool.add_worker().unwrap();
    assert_eq!(pool.size(), 3);

    pool.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn submit_without_live_workers_is_dropped() {
    let (pool, _) = pool(1, false);
    let count = counter(&pool);
    assert!(pool.remove_worker().is_some());
    assert!(pool.remove_worker().is_none());

    pool.submit("count", args![]).unwrap();
    assert_eq!(pool.metrics().dropped, 1);
    pool.shutdown();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn dedicated_worker_preserves_submission_order() {
    let (pool, _) = pool(2, true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    pool.register(
        "append",
        Callable::dynamic(move |n: i64| s.lock().unwrap().push(n)),
    )
    .unwrap();

    for n in 0..1000i64 {
        pool.submit_to_dedicated(Task::new("append", args![n])).unwrap();
    }
    pool.shutdown();
    assert_eq!(*seen.lock().unwrap(), (0..1000).collect::<Vec<_>>());

    let err = pool
        .submit_to_dedicated(Task::new("append", args![0]))
        .unwrap_err();
    assert!(matches!(err, PostError::WorkerStopped(_)));
}

#[test]
fn dedicated_submission_requires_dedicated_worker() {
    let (pool, _) = pool(1, false);
    let err = pool
        .submit_to_dedicated(Task::new("anything", args![]))
        .unwrap_err();
    assert!(matches!(err, PostError::NoDedicatedWorker));
    pool.shutdown();
}

#[test]
fn continuation_runs_on_pool_worker() {
    let (pool, sink) = pool(2, false);
    pool.register("add", Callable::dynamic(|a: i64, b: i64| a + b))
        .unwrap();
    let result = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&result);
    let done = Callable::fixed(move |args: &[Value]| r.lock().unwrap().extend_from_slice(args));

    pool.submit_task(Task::new("add", args![20, 22]).then(done, args!["answer"]))
        .unwrap();
    pool.submit("add", args!["not a number", 1]).unwrap();
    pool.shutdown();

    assert_eq!(*result.lock().unwrap(), args!["answer", 42]);
    assert_eq!(sink.len(), 1);
}
