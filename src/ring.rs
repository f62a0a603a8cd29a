//! Lock-free ring buffers for the ingestion hot path.
//!
//! Two disciplines, both fixed-capacity and non-blocking:
//!
//! - [`spsc`]: one producer, one consumer. Head and tail are plain atomic
//!   indices on separate cache lines; a release store of the advanced index
//!   publishes the slot payload to the other side's acquire load.
//! - [`mpsc`]: many producers, one consumer. Producers claim a slot with a
//!   fetch-add on the tail, then install the payload through a tagged slot
//!   state machine (Empty -> Reserved -> Full).
//!
//! The producer/consumer discipline is enforced by handle ownership: the
//! halves are not cloneable (except the MPSC producer), so a second consumer
//! cannot be constructed by safe code.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

// ============================================================================
// SPSC
// ============================================================================

struct SpscState<T> {
    /// Consumer-advanced index, masked into the slot array.
    head: CachePadded<AtomicUsize>,
    /// Producer-advanced index, masked into the slot array.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

// The state is shared between exactly one producer and one consumer half.
// Each slot is written by the producer before the release store of `tail`
// and read by the consumer only after the matching acquire load.
unsafe impl<T: Send> Send for SpscState<T> {}
unsafe impl<T: Send> Sync for SpscState<T> {}

impl<T> SpscState<T> {
    #[inline]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }
}

impl<T> Drop for SpscState<T> {
    fn drop(&mut self) {
        // Both halves are gone; drain whatever was pushed but never popped.
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        while head != tail {
            unsafe { self.slots[head].get_mut().assume_init_drop() };
            head = (head + 1) & self.mask;
        }
    }
}

/// Producer half of an SPSC ring. Send it to the producing thread.
pub struct SpscProducer<T> {
    state: Arc<SpscState<T>>,
}

/// Consumer half of an SPSC ring. Send it to the consuming thread.
pub struct SpscConsumer<T> {
    state: Arc<SpscState<T>>,
}

/// Create an SPSC ring with `capacity` slots (power of two, at least 2).
///
/// One slot stays reserved to disambiguate full from empty, so the usable
/// capacity is `capacity - 1`.
///
/// # Panics
/// Panics if `capacity` is not a power of two or is smaller than 2.
pub fn spsc<T>(capacity: usize) -> (SpscProducer<T>, SpscConsumer<T>) {
    assert!(
        capacity.is_power_of_two() && capacity >= 2,
        "ring capacity must be a power of two >= 2"
    );

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let state = Arc::new(SpscState {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
        mask: capacity - 1,
    });

    (
        SpscProducer {
            state: Arc::clone(&state),
        },
        SpscConsumer { state },
    )
}

impl<T> SpscProducer<T> {
    /// Attempt to push without blocking.
    ///
    /// Fails and returns the value when the ring is full. On success the
    /// payload is written before the tail is published with release
    /// ordering, so the consumer's acquire load observes it fully written.
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let state = &*self.state;
        let tail = state.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & state.mask;

        if next == state.head.load(Ordering::Acquire) {
            return Err(value);
        }

        unsafe { (*state.slots[tail].get()).write(value) };
        state.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Number of occupied slots; advisory only.
    #[inline]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (one slot is reserved).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.state.slots.len() - 1
    }

    /// Fill ratio in `[0, 1]`; advisory, never used for correctness.
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }
}

impl<T> SpscConsumer<T> {
    /// Attempt to pop without blocking. Returns `None` when empty.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let state = &*self.state;
        let head = state.head.load(Ordering::Relaxed);

        if head == state.tail.load(Ordering::Acquire) {
            return None;
        }

        let value = unsafe { (*state.slots[head].get()).assume_init_read() };
        state.head.store((head + 1) & state.mask, Ordering::Release);
        Some(value)
    }

    /// Number of occupied slots; advisory only.
    #[inline]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (one slot is reserved).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.state.slots.len() - 1
    }

    /// Fill ratio in `[0, 1]`; advisory, never used for correctness.
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }
}

// ============================================================================
// MPSC
// ============================================================================

const SLOT_EMPTY: u8 = 0;
const SLOT_RESERVED: u8 = 1;
const SLOT_FULL: u8 = 2;

struct MpscSlot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct MpscState<T> {
    /// Consumer-advanced counter; unbounded, masked on use.
    head: CachePadded<AtomicUsize>,
    /// Producer claim counter; unbounded, masked on use.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[MpscSlot<T>]>,
    mask: usize,
}

// A slot's payload is written by exactly one producer (the one that won the
// Empty -> Reserved transition) and read by the single consumer only after
// observing the Full tag with acquire ordering.
unsafe impl<T: Send> Send for MpscState<T> {}
unsafe impl<T: Send> Sync for MpscState<T> {}

impl<T> Drop for MpscState<T> {
    fn drop(&mut self) {
        // Release payloads still resident in Full slots so teardown
        // cannot leak.
        for slot in self.slots.iter_mut() {
            if *slot.state.get_mut() == SLOT_FULL {
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
        }
    }
}

/// Producer handle for an MPSC ring; clone one per producing thread.
pub struct MpscProducer<T> {
    state: Arc<MpscState<T>>,
}

impl<T> Clone for MpscProducer<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// Consumer half of an MPSC ring; exactly one exists.
pub struct MpscConsumer<T> {
    state: Arc<MpscState<T>>,
}

/// Create an MPSC ring with `capacity` slots (power of two, at least 2).
///
/// # Panics
/// Panics if `capacity` is not a power of two or is smaller than 2.
pub fn mpsc<T>(capacity: usize) -> (MpscProducer<T>, MpscConsumer<T>) {
    assert!(
        capacity.is_power_of_two() && capacity >= 2,
        "ring capacity must be a power of two >= 2"
    );

    let slots = (0..capacity)
        .map(|_| MpscSlot {
            state: AtomicU8::new(SLOT_EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let state = Arc::new(MpscState {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
        mask: capacity - 1,
    });

    (
        MpscProducer {
            state: Arc::clone(&state),
        },
        MpscConsumer { state },
    )
}

impl<T> MpscProducer<T> {
    /// Attempt to push without blocking.
    ///
    /// The fetch-add on the tail gives this producer a unique slot before
    /// any write. If that slot still holds a payload the consumer has not
    /// drained (a prior wraparound occupant), the push fails and returns
    /// the value: slot contention is reported as capacity exhaustion, not
    /// retried, so producer-side latency stays bounded.
    #[inline]
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let state = &*self.state;
        let pos = state.tail.fetch_add(1, Ordering::AcqRel) & state.mask;
        let slot = &state.slots[pos];

        match slot.state.compare_exchange(
            SLOT_EMPTY,
            SLOT_RESERVED,
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                unsafe { (*slot.value.get()).write(value) };
                slot.state.store(SLOT_FULL, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    /// Occupied-slot estimate; racy by nature.
    pub fn approximate_len(&self) -> usize {
        let state = &*self.state;
        let head = state.head.load(Ordering::Acquire);
        let tail = state.tail.load(Ordering::Acquire);
        tail.saturating_sub(head).min(state.slots.len())
    }
}

impl<T> MpscConsumer<T> {
    /// Attempt to pop without blocking.
    ///
    /// Scans only the head slot: if it is not Full (empty, or a producer is
    /// mid-install), reports nothing available.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let state = &*self.state;
        let head = state.head.load(Ordering::Relaxed);
        let slot = &state.slots[head & state.mask];

        if slot.state.load(Ordering::Acquire) != SLOT_FULL {
            return None;
        }

        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.state.store(SLOT_EMPTY, Ordering::Release);
        state.head.store(head + 1, Ordering::Release);
        Some(value)
    }

    /// Occupied-slot estimate; racy by nature.
    pub fn approximate_len(&self) -> usize {
        let state = &*self.state;
        let head = state.head.load(Ordering::Acquire);
        let tail = state.tail.load(Ordering::Acquire);
        tail.saturating_sub(head).min(state.slots.len())
    }
}
