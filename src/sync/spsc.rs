//! Zero-copy SPSC channel for inter-thread byte and element streaming.
//!
//! A bounded ring where the producer writes directly into the ring's
//! storage and the consumer reads directly from it; no intermediate copy
//! ever happens. Both sides follow the two-phase acquire/commit pattern:
//!
//! ```
//! use janus::sync::spsc;
//!
//! let (mut writer, mut reader) = spsc::channel::<u8>(64);
//!
//! // Producer thread: borrow a region, fill it, publish.
//! let region = writer.acquire_write(4).unwrap();
//! region[..4].copy_from_slice(b"ping");
//! writer.commit_write(4).unwrap();
//!
//! // Consumer thread: borrow the readable span, consume, release.
//! let region = reader.acquire_read(4).unwrap();
//! assert_eq!(&region[..4], b"ping");
//! reader.commit_read(4).unwrap();
//! ```
//!
//! # Thread safety
//!
//! [`Writer`] and [`Reader`] are [`Send`] but not clonable; each role is
//! held by exactly one thread at a time. Acquire methods take `&mut self`
//! so the borrowed region cannot outlive its reservation. A [`Canceller`]
//! is `Clone` and may terminate the ring from any thread, including while
//! either side is blocked.

use std::mem::align_of;
use std::sync::Arc;

use crate::error::RingError;
use crate::spsc::ring::Ring;

pub use crate::spsc::ring::SpscWriteStats;

/// Creates a zero-copy SPSC channel of `capacity` elements.
///
/// Regions are aligned to the element's natural alignment; use
/// [`channel_with_align`] to request a coarser boundary.
///
/// # Panics
///
/// Panics if `capacity` is outside `[2, i32::MAX / 2]`.
#[must_use]
pub fn channel<E: Copy + Default>(capacity: usize) -> (Writer<E>, Reader<E>) {
    channel_with_align(capacity, align_of::<E>())
}

/// Creates a zero-copy SPSC channel whose regions start on `align`-byte
/// boundaries.
///
/// The alignment holds for the base of every phase; callers that commit
/// lengths which are multiples of `align / size_of::<E>()` keep every
/// subsequent region aligned as well.
///
/// # Panics
///
/// Panics if `capacity` is outside `[2, i32::MAX / 2]`, or `align` is not
/// a power of two at least the element's alignment and a multiple of the
/// element size.
#[must_use]
pub fn channel_with_align<E: Copy + Default>(
    capacity: usize,
    align: usize,
) -> (Writer<E>, Reader<E>) {
    let ring = Arc::new(Ring::new(capacity, align));
    (
        Writer {
            ring: Arc::clone(&ring),
        },
        Reader { ring },
    )
}

/// Write end of the zero-copy channel.
///
/// Only one writer exists per channel; the type is deliberately not
/// `Clone`, and acquire/commit take `&mut self`.
pub struct Writer<E: Copy + Default> {
    ring: Arc<Ring<E>>,
}

/// Read end of the zero-copy channel. Same role rules as [`Writer`].
pub struct Reader<E: Copy + Default> {
    ring: Arc<Ring<E>>,
}

/// Clonable cancel handle; the escape hatch for blocked peers.
pub struct Canceller<E: Copy + Default> {
    ring: Arc<Ring<E>>,
}

impl<E: Copy + Default> Clone for Canceller<E> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<E: Copy + Default> Canceller<E> {
    /// Cancels the ring: wakes all waiters, fails every later operation.
    /// Idempotent.
    pub fn cancel(&self) {
        self.ring.cancel();
    }
}

impl<E: Copy + Default> Writer<E> {
    /// Borrows a writable region of at least `want` elements.
    ///
    /// Blocks until the reader frees enough space. `want == 0` never
    /// blocks: it returns whatever is free right now, or
    /// [`RingError::Full`] if nothing is.
    ///
    /// The returned region may be longer than `want`; the following
    /// [`commit_write`](Self::commit_write) may publish any prefix of it.
    ///
    /// # Errors
    ///
    /// [`RingError::TooLarge`] if `want` exceeds half the capacity,
    /// [`RingError::Full`] on a non-blocking miss, [`RingError::Cancelled`]
    /// once cancelled.
    pub fn acquire_write(&mut self, want: usize) -> Result<&mut [E], RingError> {
        let want = i32::try_from(want).map_err(|_| RingError::TooLarge)?;
        // SAFETY: `&mut self` on the sole non-clonable writer handle upholds
        // the single-writer contract.
        let (ptr, avail) = unsafe { self.ring.acquire_write(want) }?;
        // SAFETY: the ring hands out `avail` cells starting at `ptr` that
        // are writer-owned until the commit, and the region borrow is tied
        // to `self`, so no second acquire can overlap it.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, avail as usize) })
    }

    /// Publishes the first `n` elements of the last acquired region and
    /// wakes the reader.
    ///
    /// # Errors
    ///
    /// [`RingError::Overcommit`] if `n` exceeds the last region (the ring
    /// is left unchanged), [`RingError::Cancelled`] if the ring was
    /// cancelled concurrently.
    pub fn commit_write(&mut self, n: usize) -> Result<usize, RingError> {
        let n = i32::try_from(n).map_err(|_| RingError::Overcommit)?;
        // SAFETY: single-writer contract, as above.
        unsafe { self.ring.commit_write(n) }.map(|n| n as usize)
    }

    /// Blocks until the reader has drained everything, or the ring is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// [`RingError::Cancelled`] if cancelled before or during the wait.
    pub fn wait_until_empty(&self) -> Result<(), RingError> {
        self.ring.wait_until_empty()
    }

    /// Snapshot of the writer-side counters.
    #[must_use]
    pub fn write_stats(&self) -> SpscWriteStats {
        // SAFETY: the stats cell is writer-owned and this is the sole
        // writer handle.
        unsafe { self.ring.write_stats() }
    }

    /// Number of elements the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Cancels the ring. See [`Canceller::cancel`].
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    /// Returns a clonable handle that can cancel the ring from any thread.
    #[must_use]
    pub fn canceller(&self) -> Canceller<E> {
        Canceller {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<E: Copy + Default> Reader<E> {
    /// Borrows a readable region of at least `want` elements.
    ///
    /// Blocks until the writer publishes enough. `want == 0` never blocks:
    /// it returns whatever is readable right now, or [`RingError::Empty`]
    /// if nothing is.
    ///
    /// # Errors
    ///
    /// [`RingError::TooLarge`] if `want` exceeds half the capacity,
    /// [`RingError::Empty`] on a non-blocking miss, [`RingError::Cancelled`]
    /// once cancelled.
    pub fn acquire_read(&mut self, want: usize) -> Result<&[E], RingError> {
        let want = i32::try_from(want).map_err(|_| RingError::TooLarge)?;
        // SAFETY: `&mut self` on the sole non-clonable reader handle upholds
        // the single-reader contract.
        let (ptr, avail) = unsafe { self.ring.acquire_read(want) }?;
        // SAFETY: the ring hands out `avail` published cells starting at
        // `ptr`; the writer cannot reuse them until commit_read.
        Ok(unsafe { std::slice::from_raw_parts(ptr, avail as usize) })
    }

    /// Releases the first `n` elements of the last acquired region and
    /// wakes the writer.
    ///
    /// # Errors
    ///
    /// [`RingError::Overcommit`] if `n` exceeds the last region (the ring
    /// is left unchanged), [`RingError::Cancelled`] if the ring was
    /// cancelled concurrently.
    pub fn commit_read(&mut self, n: usize) -> Result<usize, RingError> {
        let n = i32::try_from(n).map_err(|_| RingError::Overcommit)?;
        // SAFETY: single-reader contract, as above.
        unsafe { self.ring.commit_read(n) }.map(|n| n as usize)
    }

    /// Number of elements the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Cancels the ring. See [`Canceller::cancel`].
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    /// Returns a clonable handle that can cancel the ring from any thread.
    #[must_use]
    pub fn canceller(&self) -> Canceller<E> {
        Canceller {
            ring: Arc::clone(&self.ring),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn hello_world_round_trip() {
        let (mut writer, mut reader) = channel::<u8>(64);

        let region = writer.acquire_write(32).unwrap();
        for (i, cell) in region[..32].iter_mut().enumerate() {
            *cell = 10 + i as u8;
        }
        assert_eq!(writer.commit_write(32), Ok(32));

        let region = reader.acquire_read(32).unwrap();
        assert!(region.len() >= 32);
        let expected: Vec<u8> = (10..42).collect();
        assert_eq!(&region[..32], expected.as_slice());
        assert_eq!(reader.commit_read(32), Ok(32));

        assert_eq!(reader.acquire_read(0).unwrap_err(), RingError::Empty);
    }

    #[test]
    fn wrap_preserves_byte_order() {
        let (mut writer, mut reader) = channel::<u8>(64);

        // Fill and drain 40 so the cursors sit mid-buffer.
        let region = writer.acquire_write(32).unwrap();
        for (i, cell) in region[..40].iter_mut().enumerate() {
            *cell = i as u8;
        }
        writer.commit_write(40).unwrap();
        let region = reader.acquire_read(32).unwrap();
        assert_eq!(region.len(), 40);
        reader.commit_read(40).unwrap();

        // 30 more don't fit the 24-element suffix, so the writer flips to
        // the back phase and restarts at the bottom.
        let region = writer.acquire_write(30).unwrap();
        assert_eq!(region.len(), 39);
        for (i, cell) in region[..30].iter_mut().enumerate() {
            *cell = 40 + i as u8;
        }
        writer.commit_write(30).unwrap();

        let region = reader.acquire_read(30).unwrap();
        assert_eq!(region.len(), 30);
        let expected: Vec<u8> = (40..70).collect();
        assert_eq!(&region[..30], expected.as_slice());
        reader.commit_read(30).unwrap();
    }

    #[test]
    fn blocked_reader_wakes_on_commit() {
        let (mut writer, mut reader) = channel::<u8>(64);

        let consumer = thread::spawn(move || {
            let region = reader.acquire_read(1).unwrap();
            let value = region[0];
            reader.commit_read(1).unwrap();
            value
        });

        // Give the reader a moment to park.
        thread::sleep(Duration::from_millis(20));
        let region = writer.acquire_write(1).unwrap();
        region[0] = 123;
        writer.commit_write(1).unwrap();

        assert_eq!(consumer.join().unwrap(), 123);
    }

    #[test]
    fn blocked_writer_wakes_on_drain() {
        let (mut writer, mut reader) = channel::<u8>(16);

        let region = writer.acquire_write(8).unwrap();
        region[..12].fill(7);
        writer.commit_write(12).unwrap();

        let producer = thread::spawn(move || {
            // Only 4 suffix cells left and the reader still pins the
            // prefix: this parks until the drain below.
            let region = writer.acquire_write(8).unwrap();
            region[..8].fill(9);
            writer.commit_write(8).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        let region = reader.acquire_read(12).unwrap();
        assert!(region[..12].iter().all(|&b| b == 7));
        reader.commit_read(12).unwrap();

        producer.join().unwrap();
        let region = reader.acquire_read(8).unwrap();
        assert!(region[..8].iter().all(|&b| b == 9));
        reader.commit_read(8).unwrap();
    }

    #[test]
    fn cancel_unblocks_waiting_reader() {
        let (writer, mut reader) = channel::<u8>(64);
        let canceller = writer.canceller();

        let consumer = thread::spawn(move || reader.acquire_read(1).map(|_| ()).unwrap_err());

        thread::sleep(Duration::from_millis(20));
        canceller.cancel();

        assert_eq!(consumer.join().unwrap(), RingError::Cancelled);
        drop(writer);
    }

    #[test]
    fn cancel_unblocks_waiting_writer() {
        let (mut writer, reader) = channel::<u8>(16);
        let canceller = reader.canceller();

        let region = writer.acquire_write(8).unwrap();
        region[..12].fill(1);
        writer.commit_write(12).unwrap();

        let producer = thread::spawn(move || writer.acquire_write(8).map(|_| ()).unwrap_err());

        thread::sleep(Duration::from_millis(20));
        canceller.cancel();

        assert_eq!(producer.join().unwrap(), RingError::Cancelled);
        drop(reader);
    }

    #[test]
    fn wait_until_empty_returns_after_drain() {
        let (mut writer, mut reader) = channel::<u8>(64);

        let region = writer.acquire_write(10).unwrap();
        region[..10].fill(5);
        writer.commit_write(10).unwrap();

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let region = reader.acquire_read(10).unwrap();
            assert_eq!(region.len(), 10);
            reader.commit_read(10).unwrap();
        });

        writer.wait_until_empty().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn non_blocking_acquires_report_state() {
        let (mut writer, mut reader) = channel::<u8>(8);

        assert_eq!(reader.acquire_read(0).unwrap_err(), RingError::Empty);

        // Fill every usable cell.
        let region = writer.acquire_write(0).unwrap();
        let n = region.len();
        writer.commit_write(n).unwrap();
        assert_eq!(n, 8);

        assert_eq!(writer.acquire_write(0).unwrap_err(), RingError::Full);

        let avail = reader.acquire_read(0).unwrap().len();
        assert_eq!(avail, 8);
        reader.commit_read(avail).unwrap();
    }

    #[test]
    fn write_stats_count_pressure() {
        let (mut writer, mut reader) = channel::<u8>(8);

        assert_eq!(writer.write_stats(), SpscWriteStats::default());

        let region = writer.acquire_write(4).unwrap();
        let n = region.len();
        writer.commit_write(n).unwrap();

        // Full ring: the non-blocking miss is counted.
        assert_eq!(writer.acquire_write(0).unwrap_err(), RingError::Full);
        assert_eq!(writer.write_stats().insufficient, 1);
        assert_eq!(writer.write_stats().wait_count, 0);

        let n = reader.acquire_read(0).unwrap().len();
        reader.commit_read(n).unwrap();
    }

    #[test]
    fn element_ring_carries_larger_types() {
        let (mut writer, mut reader) = channel::<u64>(16);

        let region = writer.acquire_write(4).unwrap();
        region[..4].copy_from_slice(&[1, 2, 3, 4]);
        writer.commit_write(4).unwrap();

        let region = reader.acquire_read(4).unwrap();
        assert_eq!(&region[..4], &[1, 2, 3, 4]);
        reader.commit_read(4).unwrap();
    }

    #[test]
    fn aligned_channel_hands_out_aligned_regions() {
        let (mut writer, _reader) = channel_with_align::<u8>(64, 32);
        let region = writer.acquire_write(8).unwrap();
        assert_eq!(region.as_ptr() as usize % 32, 0);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 2")]
    fn tiny_capacity_panics() {
        let _ = channel::<u8>(1);
    }
}
