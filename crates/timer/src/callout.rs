//! Second-granularity delayed calls.
//!
//! `call_out` never takes a lock: requests go through a [`RingQueue`] and a
//! once-per-second tick sorts them into per-second buckets. Calls fire up to
//! one second late, which is the price for supporting very large numbers of
//! them cheaply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Timelike;
use courier_core::{Callable, Clock};
use courier_post::{Dispatcher, Task, CALLOUT_GROUP};
use courier_queue::RingQueue;
use tracing::{debug, warn};

use crate::error::TimerError;
use crate::heap::{TimerHandle, TimerHeap};

const SECOND: Duration = Duration::from_secs(1);

struct CalloutItem {
    task: Mutex<Option<Task>>,
}

impl CalloutItem {
    fn task(&self) -> MutexGuard<'_, Option<Task>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation token for a pending callout.
#[derive(Clone)]
pub struct CalloutHandle {
    item: Arc<CalloutItem>,
}

impl CalloutHandle {
    pub fn cancel(&self) {
        self.item.task().take();
    }

    /// Whether the call is still waiting to fire.
    pub fn is_active(&self) -> bool {
        self.item.task().is_some()
    }
}

struct Pending {
    delay: u64,
    item: Arc<CalloutItem>,
}

struct CalloutState {
    /// Seconds ticked so far.
    second: u64,
    buckets: HashMap<u64, Vec<Arc<CalloutItem>>>,
    intake: Vec<Pending>,
}

pub struct Callout {
    queue: RingQueue<Pending>,
    state: Mutex<CalloutState>,
    dispatcher: Arc<dyn Dispatcher>,
    timer: Mutex<Option<TimerHandle>>,
}

impl Callout {
    pub fn new(capacity: u64, dispatcher: Arc<dyn Dispatcher>) -> Result<Self, TimerError> {
        Ok(Self {
            queue: RingQueue::with_capacity(capacity)?,
            state: Mutex::new(CalloutState {
                second: 0,
                buckets: HashMap::new(),
                intake: Vec::new(),
            }),
            dispatcher,
            timer: Mutex::new(None),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CalloutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `task` roughly `secs` seconds from now.
    pub fn call_out(&self, secs: u64, task: Task) -> Result<CalloutHandle, TimerError> {
        if secs == 0 {
            return Err(TimerError::ZeroDelay);
        }
        let item = Arc::new(CalloutItem {
            task: Mutex::new(Some(task)),
        });
        let mut pending = Pending {
            delay: secs,
            item: Arc::clone(&item),
        };
        loop {
            match self.queue.put(pending) {
                Ok(_) => return Ok(CalloutHandle { item }),
                Err(rejected) if rejected.is_full() => {
                    warn!(occupancy = rejected.occupancy(), "callout intake full");
                    return Err(TimerError::CalloutFull {
                        occupancy: rejected.occupancy(),
                    });
                }
                Err(rejected) => {
                    pending = rejected.into_inner();
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Advance one second: bucket new requests, then fire the bucket that
    /// became due. Returns the number of tasks dispatched.
    pub fn tick(&self) -> usize {
        let due: Vec<Task> = {
            let mut state = self.lock_state();
            let mut intake = std::mem::take(&mut state.intake);
            self.queue.gets(&mut intake, self.queue.capacity() as usize);
            let now = state.second;
            for pending in intake.drain(..) {
                state
                    .buckets
                    .entry(now.saturating_add(pending.delay))
                    .or_default()
                    .push(pending.item);
            }
            state.intake = intake;

            state.second += 1;
            let second = state.second;
            state
                .buckets
                .remove(&second)
                .unwrap_or_default()
                .iter()
                .filter_map(|item| item.task().take())
                .collect()
        };

        let mut dispatched = 0;
        for task in due {
            match self.dispatcher.dispatch(CALLOUT_GROUP, task) {
                Ok(()) => dispatched += 1,
                Err(e) => warn!(error = %e, "failed to dispatch callout"),
            }
        }
        if dispatched > 0 {
            debug!(dispatched, "callouts fired");
        }
        dispatched
    }

    /// Calls waiting to fire, including cancelled ones not yet reached.
    pub fn pending(&self) -> usize {
        let bucketed: usize = self.lock_state().buckets.values().map(Vec::len).sum();
        bucketed + self.queue.quantity() as usize
    }

    /// Tick once a second from `heap`, aligned to the next second boundary.
    pub fn start(self: &Arc<Self>, heap: &TimerHeap, clock: &dyn Clock) {
        let until_next = SECOND
            .checked_sub(Duration::from_nanos(u64::from(clock.now().nanosecond() % 1_000_000_000)))
            .unwrap_or(SECOND);
        let callout: Weak<Self> = Arc::downgrade(self);
        let tick = Task::new(
            Callable::fixed(move |_| {
                if let Some(callout) = callout.upgrade() {
                    callout.tick();
                }
            }),
            Vec::new(),
        )
        .strict();
        let timer = heap.schedule(until_next, Some(SECOND), tick);
        if let Some(previous) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer)
        {
            previous.cancel();
        }
    }

    pub fn stop(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_clock, tagged, RecordingDispatcher};
    use crate::types::TimerConfig;
    use chrono::TimeDelta;
    use courier_core::Value;

    fn callout(capacity: u64) -> (Callout, Arc<RecordingDispatcher>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        (Callout::new(capacity, dispatcher.clone()).unwrap(), dispatcher)
    }

    #[test]
    fn fires_after_requested_seconds() {
        let (callout, sent) = callout(64);
        callout.call_out(3, tagged(3)).unwrap();
        callout.call_out(1, tagged(1)).unwrap();

        assert_eq!(callout.tick(), 1);
        assert_eq!(sent.tags(), vec![Value::Int(1)]);
        assert_eq!(callout.tick(), 0);
        assert_eq!(callout.tick(), 1);
        assert_eq!(sent.tags(), vec![Value::Int(1), Value::Int(3)]);
        assert!(sent.groups().iter().all(|g| g == CALLOUT_GROUP));
        assert_eq!(callout.pending(), 0);
    }

    #[test]
    fn requests_are_relative_to_intake_tick() {
        let (callout, sent) = callout(64);
        callout.tick();
        callout.tick();
        callout.call_out(2, tagged(7)).unwrap();
        assert_eq!(callout.tick(), 0);
        assert_eq!(callout.tick(), 1);
        assert_eq!(sent.count(), 1);
    }

    #[test]
    fn huge_delay_does_not_disturb_other_callouts() {
        let (callout, sent) = callout(64);
        callout.tick();
        callout.call_out(u64::MAX, tagged(1)).unwrap();
        callout.call_out(1, tagged(2)).unwrap();

        assert_eq!(callout.tick(), 1);
        assert_eq!(sent.tags(), vec![Value::Int(2)]);
        assert_eq!(callout.pending(), 1);
        assert_eq!(callout.tick(), 0);
    }

    #[test]
    fn cancelled_callout_is_skipped() {
        let (callout, sent) = callout(64);
        let handle = callout.call_out(1, tagged(1)).unwrap();
        assert!(handle.is_active());
        handle.cancel();
        assert_eq!(callout.tick(), 0);
        assert_eq!(sent.count(), 0);
    }

    #[test]
    fn zero_delay_and_full_intake_are_errors() {
        let (callout, _) = callout(4);
        assert!(matches!(
            callout.call_out(0, tagged(0)),
            Err(TimerError::ZeroDelay)
        ));
        for i in 0..3 {
            callout.call_out(5, tagged(i)).unwrap();
        }
        assert!(matches!(
            callout.call_out(5, tagged(9)),
            Err(TimerError::CalloutFull { occupancy: 3 })
        ));
        // A tick empties the intake queue.
        callout.tick();
        assert!(callout.call_out(5, tagged(9)).is_ok());
        assert_eq!(callout.pending(), 4);
    }

    #[test]
    fn driven_by_timer_heap_each_second() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let clock = manual_clock();
        let heap = TimerHeap::new(&TimerConfig::default(), dispatcher.clone(), clock.clone());
        let callout = Arc::new(Callout::new(64, dispatcher.clone()).unwrap());
        callout.start(&heap, clock.as_ref());

        callout.call_out(2, tagged(4)).unwrap();
        // Each heap tick dispatches the callout tick; running it may in turn
        // dispatch due callouts into the same recorder.
        let mut fired = Vec::new();
        for _ in 0..3 {
            clock.advance(TimeDelta::seconds(1));
            assert_eq!(heap.tick(), 1);
            dispatcher.run_all();
            fired.push(dispatcher.count());
        }
        assert_eq!(fired, vec![0, 1, 0]);
        callout.stop();
        clock.advance(TimeDelta::seconds(1));
        assert_eq!(heap.tick(), 0);
    }
}
