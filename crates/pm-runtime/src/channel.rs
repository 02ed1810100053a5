//! Bounded blocking handoff between the sampling and logging threads.
//!
//! A fixed ring of slots guarded by one mutex with two condition
//! variables. `put` blocks while the ring is full and `get` blocks while it
//! is empty, so no record is ever overwritten or dropped. All storage is
//! allocated up front; the steady state does not allocate.
//!
//! Closing the channel is the cancellation path for blocked threads: every
//! waiter wakes, producers fail immediately, and consumers keep draining
//! until the ring is empty.

use pm_common::error::{PmError, PmResult};
use pm_common::record::Record;
use static_assertions::assert_impl_all;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// The channel was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("channel closed")]
pub struct Closed;

/// Ring state, only touched with the lock held.
#[derive(Debug)]
struct Ring<T> {
    slots: Box<[T]>,
    /// Next slot to write.
    head: usize,
    /// Next slot to read.
    tail: usize,
    /// Occupied slots.
    count: usize,
    closed: bool,
    /// Largest `count` seen so far.
    high_water: usize,
}

/// Fixed-capacity FIFO between one producer and one consumer thread.
#[derive(Debug)]
pub struct BoundedChannel<T = Record> {
    ring: Mutex<Ring<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    mask: usize,
}

assert_impl_all!(BoundedChannel<Record>: Send, Sync);

impl<T: Copy + Default> BoundedChannel<T> {
    /// Allocate a channel with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Config`] unless `capacity` is a non-zero power of two.
    pub fn new(capacity: usize) -> PmResult<Self> {
        if !capacity.is_power_of_two() {
            return Err(PmError::Config(format!(
                "channel capacity must be a non-zero power of two, got {capacity}"
            )));
        }

        Ok(Self {
            ring: Mutex::new(Ring {
                slots: vec![T::default(); capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
                closed: false,
                high_water: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            mask: capacity - 1,
        })
    }

    // A panic while holding the lock cannot leave the ring inconsistent:
    // every mutation completes before any call that could unwind.
    fn lock(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the channel is closed before or while waiting.
    /// The item is not stored in that case.
    pub fn put(&self, item: T) -> Result<(), Closed> {
        let mut ring = self.lock();
        while !ring.closed && ring.count == self.capacity {
            ring = self
                .not_full
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if ring.closed {
            return Err(Closed);
        }

        let head = ring.head;
        ring.slots[head] = item;
        ring.head = (head + 1) & self.mask;
        ring.count += 1;
        ring.high_water = ring.high_water.max(ring.count);
        debug_assert!(
            ring.count == self.capacity
                || ring.count == (ring.head.wrapping_sub(ring.tail) & self.mask)
        );

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the channel is empty.
    ///
    /// Items stored before [`close`](Self::close) are still returned.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] once the channel is both closed and empty.
    pub fn get(&self) -> Result<T, Closed> {
        let mut ring = self.lock();
        while ring.count == 0 {
            if ring.closed {
                return Err(Closed);
            }
            ring = self
                .not_empty
                .wait(ring)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let tail = ring.tail;
        let item = ring.slots[tail];
        ring.tail = (tail + 1) & self.mask;
        ring.count -= 1;

        self.not_full.notify_one();
        Ok(item)
    }

    /// Close the channel and wake every blocked thread. Idempotent.
    pub fn close(&self) {
        let mut ring = self.lock();
        ring.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items currently stored.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// Whether no items are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count fixed at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest fill level observed since construction.
    pub fn high_water_mark(&self) -> usize {
        self.lock().high_water
    }
}
