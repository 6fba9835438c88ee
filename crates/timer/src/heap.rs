//! Timer heap scheduler.
//!
//! Timers live in a binary min-heap keyed by `(fire_at, seq)`, so timers
//! with the same deadline fire in the order they were added. Cancelling a
//! timer only clears its task; the heap entry stays until it is popped and
//! then gets skipped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicBool};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use courier_core::{Callable, Clock};
use courier_post::{Dispatcher, Task, TIMER_GROUP};
use tracing::{debug, info, warn};

use crate::error::TimerError;
use crate::types::TimerConfig;

struct TimerInner {
    interval: TimeDelta,
    repeat: bool,
    /// `None` once cancelled or fired (one-shot).
    task: Mutex<Option<Task>>,
}

impl TimerInner {
    fn task(&self) -> std::sync::MutexGuard<'_, Option<Task>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation token for a timer.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<TimerInner>,
}

impl TimerHandle {
    /// Stop the timer from firing again. A fire already handed to the job
    /// group still runs.
    pub fn cancel(&self) {
        self.inner.task().take();
    }

    /// Whether the timer may still fire.
    pub fn is_active(&self) -> bool {
        self.inner.task().is_some()
    }

    pub fn is_repeating(&self) -> bool {
        self.inner.repeat
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("repeat", &self.inner.repeat)
            .field("active", &self.is_active())
            .finish()
    }
}

struct Entry {
    fire_at: DateTime<Utc>,
    seq: u64,
    timer: Arc<TimerInner>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

struct HeapState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl HeapState {
    fn next_seq(&mut self) -> u64 {
        if self.heap.is_empty() {
            self.next_seq = 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn after(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct TimerHeap {
    state: Mutex<HeapState>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    tick_interval: Duration,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerHeap {
    pub fn new(config: &TimerConfig, dispatcher: Arc<dyn Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(HeapState {
                heap: BinaryHeap::new(),
                next_seq: 1,
            }),
            dispatcher,
            clock,
            min_interval: config.min_interval(),
            tick_interval: config.tick_interval(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `task` to fire after `delay`, then every `interval` if given.
    ///
    /// Both durations are raised to the minimum interval.
    pub fn schedule(&self, delay: Duration, interval: Option<Duration>, task: Task) -> TimerHandle {
        let delay = delay.max(self.min_interval);
        let inner = Arc::new(TimerInner {
            interval: to_delta(interval.unwrap_or(delay).max(self.min_interval)),
            repeat: interval.is_some(),
            task: Mutex::new(Some(task)),
        });
        let fire_at = after(self.clock.now(), to_delta(delay));

        let mut state = self.lock_state();
        let seq = state.next_seq();
        state.heap.push(Reverse(Entry {
            fire_at,
            seq,
            timer: Arc::clone(&inner),
        }));
        TimerHandle { inner }
    }

    /// Schedule `task` once or, with `repeat`, every `delay`.
    pub fn add(&self, delay: Duration, task: Task, repeat: bool) -> TimerHandle {
        self.schedule(delay, repeat.then_some(delay), task)
    }

    /// One-shot timer.
    pub fn add_callback(&self, delay: Duration, task: Task) -> TimerHandle {
        self.add(delay, task, false)
    }

    /// Repeating timer.
    pub fn add_timer(&self, interval: Duration, task: Task) -> TimerHandle {
        self.add(interval, task, true)
    }

    /// Repeating timer around a plain closure.
    pub fn every<F>(&self, interval: Duration, f: F) -> TimerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_timer(interval, Task::new(Callable::fixed(move |_| f()), Vec::new()).strict())
    }

    /// Entries in the heap, including cancelled ones not yet popped.
    pub fn len(&self) -> usize {
        self.lock_state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire every timer that is due. Returns the number of tasks dispatched.
    pub fn tick(&self) -> usize {
        let now = self.clock.now();
        let mut due = Vec::new();
        {
            let mut state = self.lock_state();
            loop {
                match state.heap.peek() {
                    Some(Reverse(top)) if top.fire_at <= now => {}
                    _ => break,
                }
                let Some(Reverse(entry)) = state.heap.pop() else {
                    break;
                };

                let task = if entry.timer.repeat {
                    entry.timer.task().clone()
                } else {
                    entry.timer.task().take()
                };
                let Some(task) = task else {
                    continue;
                };

                if entry.timer.repeat {
                    let mut next = after(entry.fire_at, entry.timer.interval);
                    if next <= now {
                        next = after(now, entry.timer.interval);
                    }
                    let seq = state.next_seq();
                    state.heap.push(Reverse(Entry {
                        fire_at: next,
                        seq,
                        timer: entry.timer,
                    }));
                }
                due.push(task);
            }
        }

        let mut dispatched = 0;
        for task in due {
            match self.dispatcher.dispatch(TIMER_GROUP, task) {
                Ok(()) => dispatched += 1,
                Err(e) => warn!(error = %e, "failed to dispatch fired timer"),
            }
        }
        if dispatched > 0 {
            debug!(dispatched, "timers fired");
        }
        dispatched
    }

    /// Spawn the tick loop.
    pub fn start(self: &Arc<Self>) -> Result<(), TimerError> {
        if self.running.swap(true, atomic::Ordering::AcqRel) {
            return Ok(());
        }
        let heap = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("timer-tick".into())
            .spawn(move || {
                while heap.running.load(atomic::Ordering::Acquire) {
                    heap.tick();
                    thread::sleep(heap.tick_interval);
                }
            });
        match spawned {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(tick_ms = self.tick_interval.as_millis() as u64, "timer heap started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, atomic::Ordering::Release);
                Err(TimerError::Spawn(e))
            }
        }
    }

    /// Stop the tick loop. Pending timers stay in the heap.
    pub fn stop(&self) {
        self.running.store(false, atomic::Ordering::Release);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("timer tick loop panicked");
            }
            info!("timer heap stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_clock, tagged, RecordingDispatcher};
    use courier_core::{ManualClock, Value};

    fn heap() -> (TimerHeap, Arc<RecordingDispatcher>, Arc<ManualClock>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = manual_clock();
        let heap = TimerHeap::new(&TimerConfig::default(), dispatcher.clone(), clock.clone());
        (heap, dispatcher, clock)
    }

    fn ms(n: i64) -> TimeDelta {
        TimeDelta::milliseconds(n)
    }

    #[test]
    fn equal_deadlines_fire_in_add_order() {
        let (heap, sent, clock) = heap();
        for tag in 0..5 {
            heap.add_callback(Duration::from_millis(50), tagged(tag));
        }
        clock.advance(ms(50));
        assert_eq!(heap.tick(), 5);
        assert_eq!(sent.tags(), (0..5).map(Value::Int).collect::<Vec<_>>());
        assert!(sent.groups().iter().all(|g| g == TIMER_GROUP));
    }

    #[test]
    fn earlier_deadline_fires_first() {
        let (heap, sent, clock) = heap();
        heap.add_callback(Duration::from_millis(30), tagged(2));
        heap.add_callback(Duration::from_millis(10), tagged(1));
        clock.advance(ms(10));
        heap.tick();
        clock.advance(ms(20));
        heap.tick();
        assert_eq!(sent.tags(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (heap, sent, clock) = heap();
        let handle = heap.add_callback(Duration::from_millis(30), tagged(1));
        handle.cancel();
        assert!(!handle.is_active());
        for _ in 0..5 {
            clock.advance(ms(10));
            heap.tick();
        }
        assert_eq!(sent.count(), 0);
        assert!(heap.is_empty());
    }

    #[test]
    fn one_shot_fires_once_and_deactivates() {
        let (heap, sent, clock) = heap();
        let handle = heap.add_callback(Duration::from_millis(20), tagged(1));
        assert!(!handle.is_repeating());
        clock.advance(ms(10));
        assert_eq!(heap.tick(), 0);
        clock.advance(ms(10));
        assert_eq!(heap.tick(), 1);
        clock.advance(ms(100));
        assert_eq!(heap.tick(), 0);
        assert!(!handle.is_active());
        assert_eq!(sent.count(), 1);
    }

    #[test]
    fn repeating_timer_fires_once_per_interval() {
        let (heap, sent, clock) = heap();
        let n = 20;
        let handle = heap.add_timer(Duration::from_millis(100), tagged(7));
        assert!(handle.is_repeating());
        for _ in 0..n * 10 {
            clock.advance(ms(10));
            heap.tick();
        }
        let fired = sent.count();
        assert!((n - 1..=n + 1).contains(&fired), "fired {fired} times");
        assert!(handle.is_active());

        handle.cancel();
        clock.advance(ms(1_000));
        heap.tick();
        assert_eq!(sent.count(), fired);
    }

    #[test]
    fn late_repeating_timer_does_not_catch_up() {
        let (heap, sent, clock) = heap();
        heap.add_timer(Duration::from_millis(10), tagged(1));
        clock.advance(ms(1_000));
        assert_eq!(heap.tick(), 1);
        assert_eq!(heap.tick(), 0);
        clock.advance(ms(10));
        assert_eq!(heap.tick(), 1);
        assert_eq!(sent.count(), 2);
    }

    #[test]
    fn short_delays_are_clamped() {
        let (heap, _, clock) = heap();
        heap.add_callback(Duration::ZERO, tagged(1));
        assert_eq!(heap.tick(), 0);
        clock.advance(ms(10));
        assert_eq!(heap.tick(), 1);
    }

    #[test]
    fn schedule_with_first_delay_and_interval() {
        let (heap, sent, clock) = heap();
        heap.schedule(
            Duration::from_millis(500),
            Some(Duration::from_millis(100)),
            tagged(1),
        );
        clock.advance(ms(400));
        assert_eq!(heap.tick(), 0);
        clock.advance(ms(100));
        assert_eq!(heap.tick(), 1);
        clock.advance(ms(100));
        assert_eq!(heap.tick(), 1);
        assert_eq!(sent.count(), 2);
    }
}
