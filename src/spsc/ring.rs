//! Core lock-free zero-copy SPSC ring buffer algorithm.
//!
//! One contiguous buffer, two cursors, no intermediate copies: the writer
//! acquires a borrowed region, fills it in place and commits; the reader
//! does the same on its side. The ring is always in one of two geometric
//! phases, decided by comparing the cursors:
//!
//! ```text
//! [front]  read <= write          [back]  write < read
//!   +--+                            +--+
//!   |  |  <- free                   |##|  <- written (new lap)
//!   |**|  <- read                   |  |  <- write
//!   |**|     readable               |  |     free (up to read-1)
//!   |  |  <- write                  |**|  <- read
//!   |  |     free                   |**|     readable tail
//!   +--+                            +--+ <- read_end
//! ```
//!
//! In the front phase the readable span is `[read, write)`. When the free
//! suffix shrinks below the prefix in front of `read`, the writer *flips*
//! to the back phase: it restarts at the bottom of the buffer and records
//! the old cursor as `read_end`, the exclusive bound the reader may drain
//! the tail to. One cell before `read` stays reserved so `read == write`
//! always means empty, never full.
//!
//! The writer context packs `(write_index, read_end_index)` into a single
//! 64-bit word so the reader observes both fields move atomically when
//! deciding the phase. Negative indices mark the ring cancelled; the
//! sentinel rides the same CAS machinery as normal updates, so there is no
//! separate flag to race against.
//!
//! # Safety
//!
//! The types in this module have unsafe APIs because they require the
//! caller to uphold the SPSC invariant: exactly one writer and one reader,
//! with no concurrent access to either role.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::sync::atomic::Ordering;

use crate::error::RingError;
use crate::sync::wait::{WaitableI32, WaitableU64};
use crate::trace::{debug, trace};

/// Role marker: fields owned exclusively by the writer thread.
pub(crate) struct WriterRole;

/// Role marker: fields owned exclusively by the reader thread.
pub(crate) struct ReaderRole;

/// Role marker: buffer cells whose ownership transfers via the ring protocol.
pub(crate) struct SlotRole;

/// Interior-mutable cell with a role marker for nominal type safety.
///
/// The `Role` doesn't affect runtime behavior; it exists purely to make the
/// different logical kinds of cells distinct types at compile time.
#[repr(transparent)]
pub(crate) struct RingCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> RingCell<T, Role> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub(crate) const fn get(&self) -> &UnsafeCell<T> {
        &self.0
    }
}

// SAFETY: RingCell is Sync because the ring protocol guarantees that each
// cell is mutated by at most one role at a time: scratch and stats cells
// belong to exactly one side, and buffer slots in the writer's range and
// the reader's range are disjoint. The release/acquire pairs on the index
// atomics provide the synchronization barrier between writes and reads.
unsafe impl<T: Send, Role> Sync for RingCell<T, Role> {}
unsafe impl<T: Send, Role> Send for RingCell<T, Role> {}

/// Cache cell owned exclusively by the writer.
type WriterCache<T> = RingCell<T, WriterRole>;

/// Cache cell owned exclusively by the reader.
type ReaderCache<T> = RingCell<T, ReaderRole>;

/// Buffer slot cell with ownership governed by the ring protocol.
type SlotCell<T> = RingCell<T, SlotRole>;

/// Cancel sentinel installed into both index atomics.
const CANCELLED: i32 = -1;

/// Packs `(write_index, read_end_index)` into one word, low half first.
#[inline]
pub(crate) const fn encode_ctx(write_index: i32, read_end_index: i32) -> u64 {
    (write_index as u32 as u64) | ((read_end_index as u32 as u64) << 32)
}

/// Inverse of [`encode_ctx`].
#[inline]
pub(crate) const fn decode_ctx(ctx: u64) -> (i32, i32) {
    (ctx as u32 as i32, (ctx >> 32) as u32 as i32)
}

#[inline]
fn is_front(write_index: i32, read_index: i32) -> bool {
    read_index <= write_index
}

/// Free span visible to the writer, plus the flipped write cursor when the
/// prefix in front of `read` beats the remaining suffix.
#[inline]
fn write_available(write_index: i32, read_index: i32, capacity: i32) -> (i32, i32) {
    if is_front(write_index, read_index) {
        let suffix = capacity - write_index;
        // One cell stays reserved so read == write always means empty.
        let prefix = read_index - 1;
        if suffix < prefix {
            return (prefix, 0); // flip to back
        }
        return (suffix, -1);
    }
    (read_index - write_index - 1, -1)
}

/// Readable span, plus the flipped read cursor once the back tail drains.
///
/// The writer may still believe the ring is in the back phase (it never
/// retracts `read_end`), while the reader has already flipped to the front;
/// the phase test must therefore use the reader's own cursor.
#[inline]
fn read_available(write_index: i32, read_end_index: i32, read_index: i32) -> (i32, i32) {
    if is_front(write_index, read_index) {
        return (write_index - read_index, -1);
    }
    let avail = read_end_index - read_index;
    debug_assert!(avail >= 0);
    if avail == 0 {
        return (write_index, 0); // tail exhausted, flip to front
    }
    (avail, -1)
}

#[inline]
fn is_drained(write_index: i32, read_end_index: i32, read_index: i32) -> bool {
    if is_front(write_index, read_index) {
        write_index == read_index
    } else {
        read_end_index == read_index
    }
}

/// Tentative cursors computed by `acquire_write`, consumed by `commit_write`.
#[derive(Clone, Copy, Default)]
struct WriteScratch {
    /// The context word the commit CAS expects (currently published value).
    ctx: u64,
    /// Write cursor the region starts at (post-flip if one was chosen).
    write_index: i32,
    /// Tail bound that accompanies the tentative cursor.
    read_end_index: i32,
    /// Reader cursor observed during the acquire; decides the phase at commit.
    read_index: i32,
    /// Region length handed to the caller; commit must not exceed it.
    avail: i32,
}

/// Tentative cursors computed by `acquire_read`, consumed by `commit_read`.
#[derive(Clone, Copy, Default)]
struct ReadScratch {
    /// The index the commit CAS expects (currently published value).
    read_index: i32,
    /// Read cursor the region starts at (0 after a flip to front).
    start_index: i32,
    write_index: i32,
    read_end_index: i32,
    avail: i32,
}

/// Best-effort counters kept by the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpscWriteStats {
    /// Times the writer slept waiting for the reader to free space.
    pub wait_count: i32,
    /// Acquires that found less space than requested.
    pub insufficient: i32,
    /// Highest tail bound ever published on a flip to the back phase.
    pub max_read_end_index: i32,
}

/// Writer-side state: packed context word plus writer-owned scratch.
#[repr(C)]
#[repr(align(64))]
struct WriterState {
    /// Packed `(write_index, read_end_index)`.
    /// Owned by the writer, read by the reader.
    ctx: WaitableU64,

    scratch: WriterCache<WriteScratch>,

    stats: WriterCache<SpscWriteStats>,
}

/// Reader-side state: read cursor plus reader-owned scratch.
#[repr(C)]
#[repr(align(64))]
struct ReaderState {
    /// Next element to read. Owned by the reader, read by the writer.
    index: WaitableI32,

    scratch: ReaderCache<ReadScratch>,
}

/// Core zero-copy SPSC ring.
///
/// The buffer is over-allocated so that `buffer[base]` is aligned to the
/// alignment requested at construction; regions start at `base + cursor`.
#[repr(C)]
pub(crate) struct Ring<E> {
    writer: WriterState,
    reader: ReaderState,
    buffer: Box<[SlotCell<E>]>,
    base: usize,
    capacity: i32,
    #[cfg(test)]
    waiters: std::sync::atomic::AtomicI32,
}

// SAFETY: Ring is Send/Sync because cross-thread access is mediated by the
// index atomics (release on publish, acquire before touching cells) and the
// role-ownership protocol documented on RingCell.
unsafe impl<E: Send> Send for Ring<E> {}
unsafe impl<E: Send> Sync for Ring<E> {}

impl<E: Copy + Default> Ring<E> {
    /// Builds an empty ring of `capacity` elements whose first cell is
    /// aligned to `align` bytes.
    ///
    /// # Panics
    ///
    /// Panics on a capacity outside `[2, i32::MAX / 2]` or an alignment
    /// that is not a power of two, is below the element's own alignment,
    /// or is not a multiple of the element size.
    pub(crate) fn new(capacity: usize, align: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        assert!(
            capacity <= (i32::MAX / 2) as usize,
            "ring capacity must not exceed i32::MAX / 2"
        );
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert!(
            align >= align_of::<E>(),
            "alignment must be at least the element alignment"
        );
        assert!(
            align <= align_of::<E>() || align % size_of::<E>() == 0,
            "element size must divide the requested alignment"
        );

        // Over-allocate and shift the base so regions can start on the
        // requested boundary even when the allocator hands back a pointer
        // that is only aligned for E.
        let pad = if align > align_of::<E>() {
            align / size_of::<E>() - 1
        } else {
            0
        };
        let buffer: Box<[SlotCell<E>]> = (0..capacity + pad)
            .map(|_| SlotCell::new(E::default()))
            .collect();
        let base = buffer
            .iter()
            .position(|slot| (slot.get().get() as usize) % align == 0)
            .expect("padded allocation contains an aligned element");

        Self {
            writer: WriterState {
                ctx: WaitableU64::new(encode_ctx(0, 0)),
                scratch: WriterCache::new(WriteScratch::default()),
                stats: WriterCache::new(SpscWriteStats::default()),
            },
            reader: ReaderState {
                index: WaitableI32::new(0),
                scratch: ReaderCache::new(ReadScratch::default()),
            },
            buffer,
            base,
            capacity: capacity as i32,
            #[cfg(test)]
            waiters: std::sync::atomic::AtomicI32::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    fn slot_ptr(&self, index: i32) -> *mut E {
        self.buffer[self.base + index as usize].get().get()
    }

    /// Marks the ring permanently cancelled and wakes every waiter.
    ///
    /// Idempotent and callable from any thread. The sentinel is installed
    /// with the same CAS machinery the hot paths use, so an in-flight
    /// publish either lands before the sentinel or observes it and fails.
    pub(crate) fn cancel(&self) {
        loop {
            let ctx = self.writer.ctx.load(Ordering::Relaxed);
            let (write_index, _) = decode_ctx(ctx);
            if write_index < 0 {
                break;
            }
            if self
                .writer
                .ctx
                .compare_exchange(
                    ctx,
                    encode_ctx(CANCELLED, CANCELLED),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.writer.ctx.notify_all();
                break;
            }
        }
        loop {
            let index = self.reader.index.load(Ordering::Relaxed);
            if index < 0 {
                break;
            }
            if self
                .reader
                .index
                .compare_exchange(index, CANCELLED, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.reader.index.notify_all();
                break;
            }
        }
        debug!("spsc ring cancelled");
    }

    /// Reserves a writable region of at least `want` elements.
    ///
    /// `want == 0` never blocks: if no space is free the call returns
    /// [`RingError::Full`] immediately. Otherwise the call sleeps until the
    /// reader frees enough space or the ring is cancelled. On success the
    /// region starts at the returned pointer and spans `avail >= want`
    /// elements.
    ///
    /// # Safety
    ///
    /// Only the single writer thread may call this. The returned region is
    /// valid until the matching [`commit_write`](Self::commit_write).
    pub(crate) unsafe fn acquire_write(&self, want: i32) -> Result<(*mut E, i32), RingError> {
        if self.capacity / 2 < want {
            return Err(RingError::TooLarge);
        }
        // Sole mutator of the context word, so a relaxed load is current.
        let mut ctx = self.writer.ctx.load(Ordering::Relaxed);
        let (mut write_index, mut read_end_index) = decode_ctx(ctx);
        if write_index < 0 {
            return Err(RingError::Cancelled);
        }
        loop {
            // Pairs with the reader's release store of its index: every cell
            // the reader consumed before publishing is free for reuse here.
            let read_index = self.reader.index.load(Ordering::Acquire);
            if read_index < 0 {
                return Err(RingError::Cancelled);
            }

            let (avail, flipped_write_index) =
                write_available(write_index, read_index, self.capacity);
            let (start_index, tail_index) = if flipped_write_index >= 0 {
                // Wrap: the region restarts at the bottom and the current
                // cursor becomes the tail bound the reader drains to.
                (flipped_write_index, write_index)
            } else {
                (write_index, read_end_index)
            };

            if avail > 0 && want <= avail {
                // SAFETY: scratch is writer-owned (see RingCell).
                unsafe {
                    *self.writer.scratch.get().get() = WriteScratch {
                        ctx,
                        write_index: start_index,
                        read_end_index: tail_index,
                        read_index,
                        avail,
                    };
                }
                return Ok((self.slot_ptr(start_index), avail));
            }

            if flipped_write_index >= 0 {
                // Publish the flip before sleeping. The reader may have
                // exhausted the old tail and can only make progress once it
                // observes the new read_end; sleeping first would deadlock.
                let flipped = encode_ctx(start_index, tail_index);
                if !self.publish_write_ctx(ctx, flipped) {
                    return Err(RingError::Cancelled);
                }
                ctx = flipped;
                write_index = start_index;
                read_end_index = tail_index;
            }

            // SAFETY: stats are writer-owned.
            unsafe {
                (*self.writer.stats.get().get()).insufficient += 1;
            }
            if want <= 0 {
                return Err(RingError::Full);
            }
            trace!(want, avail, "writer waiting for space");
            // SAFETY: stats are writer-owned.
            unsafe {
                (*self.writer.stats.get().get()).wait_count += 1;
            }
            #[cfg(test)]
            self.waiters.fetch_add(1, Ordering::SeqCst);
            self.reader.index.wait(read_index);
            #[cfg(test)]
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Publishes `written` elements of the most recent acquire.
    ///
    /// # Safety
    ///
    /// Writer thread only, after a successful `acquire_write`.
    pub(crate) unsafe fn commit_write(&self, written: i32) -> Result<i32, RingError> {
        // SAFETY: scratch is writer-owned.
        let scratch = unsafe { *self.writer.scratch.get().get() };
        if written < 0 || scratch.avail < written {
            return Err(RingError::Overcommit);
        }

        // No wrap here; the wrap happened as the flip in acquire_write.
        let new_write_index = scratch.write_index + written;
        // In the front phase the readable span ends at the write cursor, so
        // the tail bound follows it; in the back phase the bound was fixed
        // by the flip.
        let new_read_end_index = if is_front(new_write_index, scratch.read_index) {
            new_write_index
        } else {
            scratch.read_end_index
        };

        // SAFETY: stats are writer-owned.
        unsafe {
            let stats = &mut *self.writer.stats.get().get();
            stats.max_read_end_index = stats.max_read_end_index.max(scratch.read_end_index);
        }

        if !self.publish_write_ctx(scratch.ctx, encode_ctx(new_write_index, new_read_end_index)) {
            return Err(RingError::Cancelled);
        }
        // SAFETY: scratch is writer-owned.
        unsafe {
            (*self.writer.scratch.get().get()).avail = 0;
        }
        Ok(written)
    }

    /// Reserves a readable region of at least `want` elements.
    ///
    /// `want == 0` never blocks: an empty ring returns [`RingError::Empty`]
    /// immediately. On success the region spans `avail >= want` elements,
    /// contiguous within the current phase.
    ///
    /// # Safety
    ///
    /// Only the single reader thread may call this. The returned region is
    /// valid until the matching [`commit_read`](Self::commit_read).
    pub(crate) unsafe fn acquire_read(&self, want: i32) -> Result<(*const E, i32), RingError> {
        if self.capacity / 2 < want {
            return Err(RingError::TooLarge);
        }
        // Sole mutator of the read index, so a relaxed load is current.
        let mut read_index = self.reader.index.load(Ordering::Relaxed);
        if read_index < 0 {
            return Err(RingError::Cancelled);
        }
        loop {
            // Pairs with the writer's release publish: cells below the
            // published context are fully written before we read them.
            let ctx = self.writer.ctx.load(Ordering::Acquire);
            let (write_index, read_end_index) = decode_ctx(ctx);
            if write_index < 0 {
                return Err(RingError::Cancelled);
            }

            let (avail, flipped_read_index) =
                read_available(write_index, read_end_index, read_index);
            let start_index = if flipped_read_index >= 0 {
                flipped_read_index
            } else {
                read_index
            };

            if avail > 0 && want <= avail {
                // SAFETY: scratch is reader-owned (see RingCell).
                unsafe {
                    *self.reader.scratch.get().get() = ReadScratch {
                        read_index,
                        start_index,
                        write_index,
                        read_end_index,
                        avail,
                    };
                }
                return Ok((self.slot_ptr(start_index) as *const E, avail));
            }

            if flipped_read_index >= 0 {
                // Publish the flip before sleeping so the writer sees the
                // freed tail and can make progress.
                if !self.publish_read_index(read_index, start_index) {
                    return Err(RingError::Cancelled);
                }
                read_index = start_index;
            }

            if want <= 0 {
                return Err(RingError::Empty);
            }
            trace!(want, avail, "reader waiting for data");
            #[cfg(test)]
            self.waiters.fetch_add(1, Ordering::SeqCst);
            self.writer.ctx.wait(ctx);
            #[cfg(test)]
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Releases `read` elements of the most recent acquire and wakes the
    /// writer.
    ///
    /// # Safety
    ///
    /// Reader thread only, after a successful `acquire_read`.
    pub(crate) unsafe fn commit_read(&self, read: i32) -> Result<i32, RingError> {
        // SAFETY: scratch is reader-owned.
        let scratch = unsafe { *self.reader.scratch.get().get() };
        if read < 0 || scratch.avail < read {
            return Err(RingError::Overcommit);
        }

        let mut new_read_index = scratch.start_index + read;
        if !is_front(scratch.write_index, scratch.start_index)
            && scratch.read_end_index <= new_read_index
        {
            // Drained the whole tail; continue from the bottom.
            new_read_index = 0;
        }

        if !self.publish_read_index(scratch.read_index, new_read_index) {
            return Err(RingError::Cancelled);
        }
        // SAFETY: scratch is reader-owned.
        unsafe {
            (*self.reader.scratch.get().get()).avail = 0;
        }
        Ok(read)
    }

    /// Blocks the writer until the reader has drained everything.
    ///
    /// Writer-side companion to the acquire/commit pair; there is no
    /// symmetric reader-side wait. Returns [`RingError::Cancelled`] if the
    /// ring is cancelled before or while waiting.
    pub(crate) fn wait_until_empty(&self) -> Result<(), RingError> {
        let ctx = self.writer.ctx.load(Ordering::Relaxed);
        let (write_index, read_end_index) = decode_ctx(ctx);
        if write_index < 0 {
            return Err(RingError::Cancelled);
        }
        loop {
            let read_index = self.reader.index.load(Ordering::Acquire);
            if read_index < 0 {
                return Err(RingError::Cancelled);
            }
            if is_drained(write_index, read_end_index, read_index) {
                return Ok(());
            }
            #[cfg(test)]
            self.waiters.fetch_add(1, Ordering::SeqCst);
            self.reader.index.wait(read_index);
            #[cfg(test)]
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Snapshot of the writer-side counters.
    ///
    /// # Safety
    ///
    /// Writer thread only; the stats cell is writer-owned.
    pub(crate) unsafe fn write_stats(&self) -> SpscWriteStats {
        // SAFETY: per the caller contract.
        unsafe { *self.writer.stats.get().get() }
    }

    /// Publishes a new context word with release ordering and wakes the
    /// reader. Returns false iff the ring was cancelled underneath us: the
    /// writer is the only other mutator of this word, so a genuine value
    /// change can only be the sentinel.
    fn publish_write_ctx(&self, expected: u64, desired: u64) -> bool {
        loop {
            match self.writer.ctx.compare_exchange_weak(
                expected,
                desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => {
                    if decode_ctx(observed).0 < 0 {
                        return false;
                    }
                    // Spurious weak failure; retry with the same expectation.
                }
            }
        }
        self.writer.ctx.notify_one();
        true
    }

    /// Reader-side counterpart of [`publish_write_ctx`](Self::publish_write_ctx).
    fn publish_read_index(&self, expected: i32, desired: i32) -> bool {
        loop {
            match self.reader.index.compare_exchange_weak(
                expected,
                desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => {
                    if observed < 0 {
                        return false;
                    }
                }
            }
        }
        self.reader.index.notify_one();
        true
    }
}

#[cfg(test)]
impl<E: Copy + Default> Ring<E> {
    /// Installs raw cursors; test fixtures use this to reach every state of
    /// the phase machine directly.
    pub(crate) fn set_indices(&self, write_index: i32, read_end_index: i32, read_index: i32) {
        self.writer
            .ctx
            .store(encode_ctx(write_index, read_end_index), Ordering::Relaxed);
        self.reader.index.store(read_index, Ordering::Relaxed);
    }

    pub(crate) fn indices(&self) -> (i32, i32, i32) {
        let (write_index, read_end_index) = decode_ctx(self.writer.ctx.load(Ordering::Relaxed));
        (
            write_index,
            read_end_index,
            self.reader.index.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn waiter_count(&self) -> i32 {
        self.waiters.load(Ordering::SeqCst)
    }
}
