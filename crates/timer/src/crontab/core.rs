use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use courier_core::{Callable, Clock};
use courier_post::{Dispatcher, Task, CRONTAB_GROUP};
use tracing::{debug, info, warn};

use super::entry::CronEntry;
use super::pattern::{wheel_slot, CronPattern, WHEEL_SLOTS};
use crate::error::CronError;
use crate::heap::{TimerHandle, TimerHeap};

const MINUTE: Duration = Duration::from_secs(60);

struct CronState {
    entries: HashMap<u64, Arc<CronEntry>>,
    /// Entries indexed by minute of day.
    wheel: Vec<HashMap<u64, Arc<CronEntry>>>,
    next_handle: u64,
}

/// Cancellation token for a crontab entry.
///
/// Cancelling only queues the handle; the entry is removed at the start of
/// the next check.
#[derive(Debug, Clone)]
pub struct CrontabHandle {
    id: u64,
    cancelled: Arc<Mutex<Vec<u64>>>,
}

impl CrontabHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);
    }
}

pub struct Crontab {
    state: Mutex<CronState>,
    cancelled: Arc<Mutex<Vec<u64>>>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    /// Added to the clock to get the crontab's notion of now.
    offset: Mutex<TimeDelta>,
    heap: Mutex<Option<Weak<TimerHeap>>>,
    /// Repeating minute timer driving `check`.
    minute_timer: Mutex<Option<TimerHandle>>,
}

impl Crontab {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CronState {
                entries: HashMap::new(),
                wheel: vec![HashMap::new(); WHEEL_SLOTS],
                next_handle: 1,
            }),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            dispatcher,
            clock,
            offset: Mutex::new(TimeDelta::zero()),
            heap: Mutex::new(None),
            minute_timer: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CronState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `task` to run whenever `expr` matches.
    pub fn add(
        &self,
        expr: &str,
        memo: impl Into<String>,
        task: Task,
    ) -> Result<CrontabHandle, CronError> {
        let pattern = CronPattern::parse(expr)?;
        let mut state = self.lock_state();
        let handle = state.next_handle;
        state.next_handle += 1;

        let entry = Arc::new(CronEntry {
            handle,
            expr: expr.trim().to_string(),
            memo: memo.into(),
            pattern,
            task,
        });
        for slot in pattern.wheel_slots() {
            state.wheel[slot].insert(handle, Arc::clone(&entry));
        }
        debug!(handle, entry = %entry.info(), "crontab entry added");
        state.entries.insert(handle, entry);

        Ok(CrontabHandle {
            id: handle,
            cancelled: Arc::clone(&self.cancelled),
        })
    }

    /// Run the match pass for the crontab's current time.
    pub fn check(&self) -> usize {
        self.check_at(self.now_local())
    }

    /// Run the match pass as if the local time were `at`.
    ///
    /// Applies queued cancellations first, then dispatches every entry in the
    /// `at` wheel slot whose full pattern matches. Returns the number of
    /// tasks dispatched.
    pub fn check_at(&self, at: NaiveDateTime) -> usize {
        let due: Vec<Task> = {
            let mut state = self.lock_state();
            self.apply_cancellations(&mut state);
            state.wheel[wheel_slot(at.hour(), at.minute())]
                .values()
                .filter(|entry| entry.pattern.matches(&at))
                .map(|entry| entry.task.clone())
                .collect()
        };

        let mut dispatched = 0;
        for task in due {
            match self.dispatcher.dispatch(CRONTAB_GROUP, task) {
                Ok(()) => dispatched += 1,
                Err(e) => warn!(error = %e, "failed to dispatch crontab entry"),
            }
        }
        debug!(at = %at, dispatched, "crontab checked");
        dispatched
    }

    fn apply_cancellations(&self, state: &mut CronState) {
        let cancelled = std::mem::take(
            &mut *self
                .cancelled
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in cancelled {
            if let Some(entry) = state.entries.remove(&handle) {
                for slot in entry.pattern.wheel_slots() {
                    state.wheel[slot].remove(&handle);
                }
                debug!(handle, "crontab entry removed");
            }
        }
    }

    /// Registered entries as `"pattern | memo"`, keyed by handle.
    pub fn entries(&self) -> BTreeMap<u64, String> {
        self.lock_state()
            .entries
            .iter()
            .map(|(handle, entry)| (*handle, entry.info()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries indexed under one minute-of-day slot.
    pub fn wheel_len(&self, slot: usize) -> usize {
        self.lock_state().wheel.get(slot).map_or(0, HashMap::len)
    }

    // ── Time ────────────────────────────────────────────────────────

    /// The crontab's local time, including any virtual offset.
    pub fn now_local(&self) -> NaiveDateTime {
        (self.clock.now() + self.offset()).with_timezone(&Local).naive_local()
    }

    fn offset(&self) -> TimeDelta {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pretend the local time is `at` and realign the minute check to it.
    ///
    /// Meant for testing schedules; the real clock is not touched.
    pub fn set_virtual_time(self: &Arc<Self>, at: NaiveDateTime) -> Result<(), CronError> {
        let target = Local
            .from_local_datetime(&at)
            .earliest()
            .ok_or(CronError::InvalidLocalTime(at))?;
        let offset = target.with_timezone(&Utc) - self.clock.now();
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
        info!(at = %at, "crontab virtual time set");
        self.rebootstrap();
        Ok(())
    }

    pub fn clear_virtual_time(self: &Arc<Self>) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = TimeDelta::zero();
        self.rebootstrap();
    }

    // ── Driving ─────────────────────────────────────────────────────

    /// Drive `check` from `heap`, once a minute, starting one second after
    /// the next minute boundary.
    pub fn start(self: &Arc<Self>, heap: &Arc<TimerHeap>) {
        *self.heap.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(heap));
        self.bootstrap(heap, true);
    }

    pub fn stop(&self) {
        if let Some(timer) = self
            .minute_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
    }

    fn rebootstrap(self: &Arc<Self>) {
        let heap = self
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(heap) = heap {
            self.bootstrap(&heap, false);
        }
    }

    /// Delay from now until one second past the next minute boundary.
    /// A re-bootstrap skips one more minute so the current one is not
    /// checked twice.
    pub(crate) fn alignment_delay(&self, first: bool) -> Duration {
        let now = self.clock.now() + self.offset();
        let into_minute = u64::from(now.second()) * 1_000 + u64::from(now.timestamp_subsec_millis());
        let mut delay = Duration::from_millis(61_000u64.saturating_sub(into_minute));
        if !first {
            delay += MINUTE;
        }
        delay
    }

    fn bootstrap(self: &Arc<Self>, heap: &TimerHeap, first: bool) {
        let delay = self.alignment_delay(first);
        let crontab = Arc::downgrade(self);
        let check = Task::new(
            Callable::fixed(move |_| {
                if let Some(crontab) = crontab.upgrade() {
                    crontab.check();
                }
            }),
            Vec::new(),
        )
        .strict();

        let timer = heap.schedule(delay, Some(MINUTE), check);
        let previous = self
            .minute_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
        debug!(delay_ms = delay.as_millis() as u64, first, "crontab minute check armed");
    }
}
