//! Core lock-free MPSC ring buffer algorithm.
//!
//! A bounded ring of copyable cells coordinated by three indices:
//!
//! - `write_index` — the next free cell. Producers claim cells by CAS,
//!   which linearizes delivery order across producers.
//! - `read_max_index` — the exclusive bound of *published* cells. After
//!   storing its payload, a producer publishes by CASing this index from
//!   its own reservation to the cell after it. The CAS only succeeds once
//!   the producer holding the previous cell has published, so publication
//!   follows reservation order exactly and the consumer never observes an
//!   uninitialized cell.
//! - `read_index` — the next cell the consumer reads; advanced only by the
//!   consumer in `commit_pop`.
//!
//! One cell is permanently reserved so `read_index == write_index` always
//! means empty and `(write_index + 1) % N == read_index` means full.
//!
//! `peek` hands back a borrowed *contiguous* region: it never crosses the
//! wrap seam, the consumer simply peeks again after committing to pick up
//! the prefix. Negative index values mark the ring cancelled, riding the
//! same CAS paths as normal updates.
//!
//! # Safety
//!
//! `push` is safe under any number of concurrent producers. The consumer
//! side is unsafe API: exactly one thread may peek and commit.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use crate::error::RingError;
use crate::sync::wait::WaitableI64;
use crate::trace::{debug, trace};

/// Cancel sentinel installed into the index atomics.
const CANCELLED: i64 = -1;

/// A single ring cell.
#[repr(C)]
struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: Slot is Sync because cell access is disciplined by the index
// protocol: a producer owns the cell between its reservation CAS and its
// publication CAS, and the consumer only touches cells below the published
// bound.
unsafe impl<T: Send> Sync for Slot<T> {}
unsafe impl<T: Send> Send for Slot<T> {}

/// Best-effort counters kept by the producers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MpscWriteStats {
    /// Highest number of queued cells ever observed by a producer.
    pub max_queued: i32,
    /// Times a producer slept on a full ring.
    pub wait_count: i32,
}

/// Producer-side hot words: reservation cursor, publication bound, stats.
#[repr(C)]
#[repr(align(64))]
struct ProducerState {
    /// Next cell to reserve; advanced by producers via CAS. Nothing ever
    /// sleeps on this word, so it needs no monitor.
    write_index: AtomicI64,

    /// Exclusive bound of fully stored cells; the consumer sleeps here.
    read_max_index: WaitableI64,

    max_queued: AtomicI32,
    wait_count: AtomicI32,
}

/// Consumer-side hot word plus consumer-owned scratch.
#[repr(C)]
#[repr(align(64))]
struct ConsumerState {
    /// Next cell the consumer reads; producers sleep here when full.
    read_index: WaitableI64,

    /// `(expected, desired)` recorded by peek, consumed by commit_pop.
    scratch: UnsafeCell<PopScratch>,
}

#[derive(Clone, Copy, Default)]
struct PopScratch {
    expected: i64,
    desired: i64,
}

/// Core MPSC ring buffer.
#[repr(C)]
pub(crate) struct Ring<T, const N: usize> {
    producer: ProducerState,
    consumer: ConsumerState,
    buffer: [Slot<T>; N],
}

// SAFETY: Ring is Send/Sync because cross-thread access is mediated by the
// index atomics; the consumer scratch cell is only touched by the single
// consumer (caller contract on peek/commit_pop).
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

impl<T: Copy + Send, const N: usize> Ring<T, N> {
    pub(crate) fn new() -> Self {
        Self {
            producer: ProducerState {
                write_index: AtomicI64::new(0),
                read_max_index: WaitableI64::new(0),
                max_queued: AtomicI32::new(0),
                wait_count: AtomicI32::new(0),
            },
            consumer: ConsumerState {
                read_index: WaitableI64::new(0),
                scratch: UnsafeCell::new(PopScratch::default()),
            },
            // SAFETY: an array of MaybeUninit cells needs no initialization.
            buffer: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }

    /// Marks the ring permanently cancelled and wakes every waiter.
    ///
    /// Idempotent and callable from any thread. Producers parked on a full
    /// ring and the consumer parked on an empty one re-examine their word
    /// and fail with [`RingError::Cancelled`] within one wakeup.
    pub(crate) fn cancel(&self) {
        loop {
            let index = self.producer.write_index.load(Ordering::Relaxed);
            if index < 0 {
                break;
            }
            // Nothing waits on the reservation cursor; no notify needed.
            if self
                .producer
                .write_index
                .compare_exchange(index, CANCELLED, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        loop {
            let index = self.producer.read_max_index.load(Ordering::Relaxed);
            if index < 0 {
                break;
            }
            if self
                .producer
                .read_max_index
                .compare_exchange(index, CANCELLED, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.producer.read_max_index.notify_all();
                break;
            }
        }
        loop {
            let index = self.consumer.read_index.load(Ordering::Relaxed);
            if index < 0 {
                break;
            }
            if self
                .consumer
                .read_index
                .compare_exchange(index, CANCELLED, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.consumer.read_index.notify_all();
                break;
            }
        }
        debug!("mpsc ring cancelled");
    }

    /// Enqueues one element. Safe under any number of concurrent callers.
    ///
    /// With `wait` the call sleeps on a full ring until the consumer frees
    /// a cell; without it a full ring returns [`RingError::Full`].
    pub(crate) fn push(&self, item: T, wait: bool) -> Result<(), RingError> {
        let n = N as i64;
        let (reserved, next, queued) = loop {
            let write_index = self.producer.write_index.load(Ordering::Relaxed);
            if write_index < 0 {
                return Err(RingError::Cancelled);
            }
            // Pairs with the consumer's release in commit_pop: cells below
            // read_index are free for reuse.
            let read_index = self.consumer.read_index.load(Ordering::Acquire);
            if read_index < 0 {
                return Err(RingError::Cancelled);
            }
            let next = (write_index + 1) % n;
            if next == read_index {
                // The reserved cell keeps read == write meaning empty.
                if !wait {
                    return Err(RingError::Full);
                }
                self.producer.wait_count.fetch_add(1, Ordering::Relaxed);
                trace!(write_index, "producer waiting for space");
                self.consumer.read_index.wait(read_index);
                continue;
            }
            let queued = ((n + next - read_index) % n) as i32;
            // A failed strong CAS means another producer took the cell;
            // start over with a fresh cursor.
            if self
                .producer
                .write_index
                .compare_exchange(write_index, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break (write_index, next, queued);
            }
        };

        // SAFETY: the reservation CAS granted exclusive ownership of cell
        // `reserved`; the consumer cannot see it until the publication CAS
        // below, and no other producer can claim it.
        unsafe {
            (*self.buffer[reserved as usize].value.get()).write(item);
        }

        // Best-effort high-water mark.
        let mut max_queued = self.producer.max_queued.load(Ordering::Relaxed);
        while max_queued < queued {
            match self.producer.max_queued.compare_exchange_weak(
                max_queued,
                queued,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => max_queued = observed,
            }
        }

        // Publication must follow reservation order: this CAS succeeds only
        // after the producer holding the previous cell has published, which
        // is what keeps every cell below read_max_index fully stored.
        loop {
            match self.producer.read_max_index.compare_exchange_weak(
                reserved,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.producer.read_max_index.notify_one();
                    break;
                }
                Err(observed) => {
                    if observed < 0 {
                        return Err(RingError::Cancelled);
                    }
                }
            }
        }
        Ok(())
    }

    /// Borrows up to `max` published elements as one contiguous region.
    ///
    /// With `wait` the call sleeps on an empty ring; without it emptiness
    /// returns [`RingError::Empty`]. The region never crosses the wrap
    /// seam; the caller peeks again after committing to pick up the prefix.
    ///
    /// # Safety
    ///
    /// Only the single consumer thread may call this. The returned region
    /// is valid until the matching [`commit_pop`](Self::commit_pop).
    pub(crate) unsafe fn peek(&self, max: usize, wait: bool) -> Result<(*const T, usize), RingError> {
        let n = N as i64;
        // Sole mutator of the read index, so a relaxed load is current.
        let read_index = self.consumer.read_index.load(Ordering::Relaxed);
        if read_index < 0 {
            return Err(RingError::Cancelled);
        }
        let read_max_index = loop {
            // Pairs with the producers' release publication: every cell
            // below the bound is fully stored before we read it.
            let read_max_index = self.producer.read_max_index.load(Ordering::Acquire);
            if read_max_index < 0 {
                return Err(RingError::Cancelled);
            }
            if read_index != read_max_index {
                break read_max_index;
            }
            if !wait {
                return Err(RingError::Empty);
            }
            trace!(read_index, "consumer waiting for data");
            self.producer.read_max_index.wait(read_max_index);
        };

        // Contiguous span only: stop at the seam.
        let avail = if read_index <= read_max_index {
            read_max_index - read_index
        } else {
            n - read_index
        };
        let len = avail.min(max as i64);

        // SAFETY: scratch is consumer-owned per the caller contract.
        unsafe {
            *self.consumer.scratch.get() = PopScratch {
                expected: read_index,
                desired: (read_index + len) % n,
            };
        }
        let ptr = self.buffer[read_index as usize].value.get().cast::<T>();
        Ok((ptr, len as usize))
    }

    /// Releases the region returned by the most recent peek and wakes one
    /// producer.
    ///
    /// # Safety
    ///
    /// Consumer thread only, after a successful `peek`.
    pub(crate) unsafe fn commit_pop(&self) -> Result<(), RingError> {
        // SAFETY: scratch is consumer-owned per the caller contract.
        let scratch = unsafe { *self.consumer.scratch.get() };
        loop {
            match self.consumer.read_index.compare_exchange_weak(
                scratch.expected,
                scratch.desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.consumer.read_index.notify_one();
                    return Ok(());
                }
                Err(observed) => {
                    if observed < 0 {
                        return Err(RingError::Cancelled);
                    }
                }
            }
        }
    }

    pub(crate) fn write_stats(&self) -> MpscWriteStats {
        MpscWriteStats {
            max_queued: self.producer.max_queued.load(Ordering::Relaxed),
            wait_count: self.producer.wait_count.load(Ordering::Relaxed),
        }
    }
}
