use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use courier_core::{args, Callable, MemorySink};
use courier_post::{JobGroupConfig, JobGroups, PoolConfig, Registry, Task, WorkerPool};

const SUBMITTERS: u64 = 4;
const PER_SUBMITTER: u64 = 5_000;

#[test]
fn test_submissions_survive_concurrent_resizing() {
    let config = PoolConfig {
        queue_capacity: 1 << 16,
        initial_workers: 2,
        drain_quantum_ms: 1,
        dedicated_worker: false,
    };
    let pool = Arc::new(WorkerPool::new(config, Arc::new(MemorySink::new())).unwrap());
    let sum = Arc::new(AtomicU64::new(0));
    let s = Arc::clone(&sum);
    pool.register(
        "add",
        Callable::dynamic(move |n: u64| {
            s.fetch_add(n, Ordering::Relaxed);
        }),
    )
    .unwrap();

    let resizing = Arc::new(AtomicBool::new(true));
    let resizer = {
        let pool = Arc::clone(&pool);
        let resizing = Arc::clone(&resizing);
        thread::spawn(move || {
            while resizing.load(Ordering::Acquire) {
                pool.add_workers(2).unwrap();
                thread::yield_now();
                pool.remove_worker();
                pool.remove_worker();
            }
        })
    };

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for n in 1..=PER_SUBMITTER {
                    pool.submit("add", args![n as i64]).unwrap();
                }
            })
        })
        .collect();
    for handle in submitters {
        handle.join().unwrap();
    }
    resizing.store(false, Ordering::Release);
    resizer.join().unwrap();

    pool.shutdown();
    let metrics = pool.metrics();
    assert_eq!(metrics.dropped, 0);
    assert_eq!(
        sum.load(Ordering::Relaxed),
        SUBMITTERS * PER_SUBMITTER * (PER_SUBMITTER + 1) / 2
    );
}

#[test]
fn test_group_keeps_per_producer_order_across_threads() {
    let registry = Arc::new(Registry::new());
    let jobs = Arc::new(JobGroups::new(
        JobGroupConfig {
            queue_len: 16,
            shutdown_timeout_ms: 5_000,
        },
        Arc::clone(&registry),
        Arc::new(MemorySink::new()),
    ));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    registry
        .register(
            "record",
            Callable::dynamic(move |producer: u64, seq: u64| {
                s.lock().unwrap().push((producer, seq));
            }),
        )
        .unwrap();

    let producers: Vec<_> = (0..SUBMITTERS)
        .map(|p| {
            let jobs = Arc::clone(&jobs);
            thread::spawn(move || {
                for seq in 0..500u64 {
                    jobs.append("ordered", Task::new("record", args![p as i64, seq as i64]))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }
    assert_eq!(jobs.close_all(), 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), (SUBMITTERS * 500) as usize);
    for p in 0..SUBMITTERS {
        let order: Vec<u64> = seen
            .iter()
            .filter(|(producer, _)| *producer == p)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(order, (0..500).collect::<Vec<_>>());
    }
}
