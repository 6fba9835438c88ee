//! Multi-producer multi-consumer ring buffer.
//!
//! Producers and consumers each advance an unbounded 64-bit position with a
//! single compare-and-swap. A successful CAS grants exclusive ownership of
//! slot `pos & cap_mod` for that lap; the slot's `put_no`/`get_no` pair then
//! tells the owner when the previous lap's occupant has finished with it.
//!
//! Slot generations for position `pos` (one lap is `capacity`):
//!
//! | state            | `put_no`       | `get_no` |
//! |------------------|----------------|----------|
//! | free for write   | `pos`          | `pos`    |
//! | written          | `pos + cap`    | `pos`    |
//! | read (next lap)  | `pos + cap`    | `pos + cap` |
//!
//! One slot is always left empty so full and empty never look alike.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::QueueError;

/// Largest capacity a queue may be created with.
pub const MAX_CAPACITY: u64 = 1 << 32;

/// `get_pos - put_pos` beyond this is read as `put_pos` having wrapped
/// past `u64::MAX`; anything smaller is a stale read and counts as empty.
const OVERFLOW_CHECK: u64 = 2 << 60;

/// Sleep used once spinning on a slot stops paying off.
const SLOT_WAIT_SLEEP: Duration = Duration::from_micros(50);

struct Slot<T> {
    put_no: AtomicU64,
    get_no: AtomicU64,
    value: UnsafeCell<Option<T>>,
}

pub struct RingQueue<T> {
    capacity: u64,
    cap_mod: u64,
    put_pos: CachePadded<AtomicU64>,
    get_pos: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
}

// Slot values are only touched by the thread that won the position CAS for
// that lap, and hand-off is ordered through the slot's generation counters.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

/// Why a [`RingQueue::put`] did not take its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Occupancy already reached `capacity - 1`.
    Full,
    /// Another producer moved the put position first; retrying may succeed.
    Contended,
}

/// A value handed back by a rejected [`RingQueue::put`].
pub struct Rejected<T> {
    value: T,
    occupancy: u64,
    reason: RejectReason,
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn occupancy(&self) -> u64 {
        self.occupancy
    }

    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    pub fn is_full(&self) -> bool {
        self.reason == RejectReason::Full
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("occupancy", &self.occupancy)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Occupied slot count from two position snapshots.
fn occupancy(put: u64, get: u64) -> u64 {
    if put >= get {
        put - get
    } else if get - put > OVERFLOW_CHECK {
        (u64::MAX - (get - put)) + 1
    } else {
        0
    }
}

/// Spin until `ready` holds, backing off to yields and then short sleeps.
fn wait_until(mut ready: impl FnMut() -> bool) {
    let backoff = Backoff::new();
    while !ready() {
        if backoff.is_completed() {
            thread::sleep(SLOT_WAIT_SLEEP);
        } else {
            backoff.snooze();
        }
    }
}

impl<T> RingQueue<T> {
    /// Create a queue holding at least `capacity - 1` values.
    ///
    /// The capacity is rounded up to the next power of two.
    pub fn with_capacity(capacity: u64) -> Result<Self, QueueError> {
        Self::starting_at(capacity, 0)
    }

    /// Create a queue whose positions start at `origin` instead of zero.
    fn starting_at(capacity: u64, origin: u64) -> Result<Self, QueueError> {
        if capacity > MAX_CAPACITY {
            return Err(QueueError::CapacityOverflow {
                requested: capacity,
                max: MAX_CAPACITY,
            });
        }
        if capacity < 2 {
            return Err(QueueError::CapacityTooSmall(capacity));
        }
        let capacity = capacity.next_power_of_two();
        let cap_mod = capacity - 1;
        let first = origin.wrapping_add(1);
        let slots = (0..capacity)
            .map(|index| {
                // First position at or after `first` that maps to this slot.
                let pos = first.wrapping_add(index.wrapping_sub(first) & cap_mod);
                Slot {
                    put_no: AtomicU64::new(pos),
                    get_no: AtomicU64::new(pos),
                    value: UnsafeCell::new(None),
                }
            })
            .collect();

        Ok(Self {
            capacity,
            cap_mod,
            put_pos: CachePadded::new(AtomicU64::new(origin)),
            get_pos: CachePadded::new(AtomicU64::new(origin)),
            slots,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Current number of stored values (a snapshot).
    pub fn quantity(&self) -> u64 {
        let put = self.put_pos.load(Ordering::SeqCst);
        let get = self.get_pos.load(Ordering::SeqCst);
        occupancy(put, get)
    }

    pub fn is_empty(&self) -> bool {
        self.quantity() == 0
    }

    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos & self.cap_mod) as usize]
    }

    /// Write `value` into the slot owned for position `pos`.
    fn fill(&self, pos: u64, value: T) {
        let slot = self.slot(pos);
        wait_until(|| {
            slot.put_no.load(Ordering::Acquire) == pos && slot.get_no.load(Ordering::Acquire) == pos
        });
        // SAFETY: the position CAS made this thread the only writer for `pos`,
        // and `get_no == pos` means the previous lap's reader is done.
        unsafe {
            *slot.value.get() = Some(value);
        }
        slot.put_no
            .store(pos.wrapping_add(self.capacity), Ordering::Release);
    }

    /// Take the value from the slot owned for position `pos`.
    fn take(&self, pos: u64) -> Option<T> {
        let slot = self.slot(pos);
        let published = pos.wrapping_add(self.capacity);
        wait_until(|| {
            slot.get_no.load(Ordering::Acquire) == pos
                && slot.put_no.load(Ordering::Acquire) == published
        });
        // SAFETY: the position CAS made this thread the only reader for `pos`,
        // and `put_no == pos + cap` means the writer has published.
        let value = unsafe { (*slot.value.get()).take() };
        slot.get_no.store(published, Ordering::Release);
        value
    }

    /// Append one value.
    ///
    /// Returns the occupancy after the write, or the value back when the
    /// queue is full or another producer won the position race.
    pub fn put(&self, value: T) -> Result<u64, Rejected<T>> {
        let get = self.get_pos.load(Ordering::SeqCst);
        let put = self.put_pos.load(Ordering::SeqCst);
        let occupied = occupancy(put, get);
        if occupied >= self.cap_mod {
            return Err(Rejected {
                value,
                occupancy: occupied,
                reason: RejectReason::Full,
            });
        }

        let pos = put.wrapping_add(1);
        if self
            .put_pos
            .compare_exchange(put, pos, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Rejected {
                value,
                occupancy: occupied,
                reason: RejectReason::Contended,
            });
        }

        self.fill(pos, value);
        Ok(occupied + 1)
    }

    /// Append as many values from the front of `values` as fit.
    ///
    /// Accepted values are drained from `values`; the rest stay in place.
    /// Returns `(accepted, occupancy)`. Zero accepted with free space left
    /// means the position race was lost.
    pub fn puts(&self, values: &mut Vec<T>) -> (u64, u64) {
        let get = self.get_pos.load(Ordering::SeqCst);
        let put = self.put_pos.load(Ordering::SeqCst);
        let occupied = occupancy(put, get);
        if occupied >= self.cap_mod || values.is_empty() {
            return (0, occupied);
        }

        let count = (values.len() as u64).min(self.cap_mod - occupied);
        if self
            .put_pos
            .compare_exchange(
                put,
                put.wrapping_add(count),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return (0, occupied);
        }

        for (offset, value) in values.drain(..count as usize).enumerate() {
            self.fill(put.wrapping_add(offset as u64 + 1), value);
        }
        (count, occupied + count)
    }

    /// Remove the oldest value.
    ///
    /// Returns `None` when the queue is empty or another consumer won the
    /// position race, together with the remaining occupancy.
    pub fn get(&self) -> (Option<T>, u64) {
        let put = self.put_pos.load(Ordering::SeqCst);
        let get = self.get_pos.load(Ordering::SeqCst);
        let occupied = occupancy(put, get);
        if occupied == 0 {
            return (None, 0);
        }

        let pos = get.wrapping_add(1);
        if self
            .get_pos
            .compare_exchange(get, pos, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return (None, occupied);
        }

        (self.take(pos), occupied - 1)
    }

    /// Move up to `limit` of the oldest values into `out`.
    ///
    /// Returns `(retrieved, occupancy)` where occupancy is measured before
    /// the batch was removed.
    pub fn gets(&self, out: &mut Vec<T>, limit: usize) -> (u64, u64) {
        let put = self.put_pos.load(Ordering::SeqCst);
        let get = self.get_pos.load(Ordering::SeqCst);
        let occupied = occupancy(put, get);
        if occupied == 0 || limit == 0 {
            return (0, occupied);
        }

        let count = occupied.min(limit as u64);
        if self
            .get_pos
            .compare_exchange(
                get,
                get.wrapping_add(count),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return (0, occupied);
        }

        out.reserve(count as usize);
        for offset in 1..=count {
            if let Some(value) = self.take(get.wrapping_add(offset)) {
                out.push(value);
            }
        }
        (count, occupied)
    }
}

impl<T> fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &self.capacity)
            .field("put_pos", &self.put_pos.load(Ordering::Relaxed))
            .field("get_pos", &self.get_pos.load(Ordering::Relaxed))
            .finish()
    }
}
