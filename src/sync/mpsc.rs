//! Many-producer/single-consumer channel of fixed-size elements.
//!
//! A bounded ring where any number of threads push copyable elements and
//! one consumer drains them in batches through a borrowed contiguous view:
//!
//! ```
//! use janus::sync::mpsc;
//!
//! let (sender, mut receiver) = mpsc::channel::<u64, 16>();
//!
//! let sender2 = sender.clone();
//! sender.push(1).unwrap();
//! sender2.push(2).unwrap();
//!
//! let batch = receiver.peek(16).unwrap();
//! assert_eq!(batch, &[1, 2]);
//! receiver.commit_pop().unwrap();
//! ```
//!
//! Delivery is FIFO per producer; across producers it follows the order in
//! which the reservation CAS succeeded. The peeked view never crosses the
//! wrap seam — peek again after committing to pick up the prefix.
//!
//! # Thread safety
//!
//! [`Sender`] is `Clone + Sync`; share it freely. [`Receiver`] is the
//! single consumer: not clonable, with `&mut self` receivers so the
//! borrowed batch cannot outlive its reservation.

use std::sync::Arc;

use crate::error::RingError;
use crate::mpsc::ring::Ring;

pub use crate::mpsc::ring::MpscWriteStats;

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion: one cell is reserved, so two is the minimum.
    const OK: () = assert!(N >= 2, "ring capacity must be at least 2");
}

/// Creates an MPSC channel with `N` cells (`N - 1` usable).
///
/// Fails to compile if `N < 2`.
#[must_use]
pub fn channel<T: Copy + Send, const N: usize>() -> (Sender<T, N>, Receiver<T, N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(Ring::new());
    (
        Sender {
            ring: Arc::clone(&ring),
        },
        Receiver { ring },
    )
}

/// Write end of the MPSC channel. Clone one per producer thread, or share
/// a single instance: `push` takes `&self` and is safe under concurrency.
pub struct Sender<T: Copy + Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Copy + Send, const N: usize> Clone for Sender<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Read end of the MPSC channel. Exactly one consumer exists per channel.
pub struct Receiver<T: Copy + Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

/// Clonable cancel handle; the escape hatch for blocked peers.
pub struct Canceller<T: Copy + Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
}

impl<T: Copy + Send, const N: usize> Clone for Canceller<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T: Copy + Send, const N: usize> Canceller<T, N> {
    /// Cancels the ring: wakes all waiters, fails every later operation.
    /// Idempotent.
    pub fn cancel(&self) {
        self.ring.cancel();
    }
}

impl<T: Copy + Send, const N: usize> Sender<T, N> {
    /// Enqueues one element, sleeping while the ring is full.
    ///
    /// # Errors
    ///
    /// [`RingError::Cancelled`] once the ring is cancelled.
    pub fn push(&self, item: T) -> Result<(), RingError> {
        self.ring.push(item, true)
    }

    /// Enqueues one element without blocking.
    ///
    /// # Errors
    ///
    /// [`RingError::Full`] if no cell is free, [`RingError::Cancelled`]
    /// once cancelled.
    pub fn try_push(&self, item: T) -> Result<(), RingError> {
        self.ring.push(item, false)
    }

    /// Snapshot of the producer-side counters.
    #[must_use]
    pub fn write_stats(&self) -> MpscWriteStats {
        self.ring.write_stats()
    }

    /// Cancels the ring. See [`Canceller::cancel`].
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    /// Returns a clonable handle that can cancel the ring from any thread.
    #[must_use]
    pub fn canceller(&self) -> Canceller<T, N> {
        Canceller {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T: Copy + Send, const N: usize> Receiver<T, N> {
    /// Borrows the next 1..=`max` published elements as one contiguous
    /// slice, sleeping while the ring is empty.
    ///
    /// # Errors
    ///
    /// [`RingError::Cancelled`] once the ring is cancelled.
    pub fn peek(&mut self, max: usize) -> Result<&[T], RingError> {
        // SAFETY: `&mut self` on the sole non-clonable receiver upholds the
        // single-consumer contract.
        let (ptr, len) = unsafe { self.ring.peek(max, true) }?;
        // SAFETY: the ring hands out `len` published cells; producers
        // cannot reuse them until commit_pop.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Non-blocking [`peek`](Self::peek).
    ///
    /// # Errors
    ///
    /// [`RingError::Empty`] if nothing is published, [`RingError::Cancelled`]
    /// once cancelled.
    pub fn try_peek(&mut self, max: usize) -> Result<&[T], RingError> {
        // SAFETY: as in `peek`.
        let (ptr, len) = unsafe { self.ring.peek(max, false) }?;
        // SAFETY: as in `peek`.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Releases the batch returned by the most recent peek and wakes one
    /// producer.
    ///
    /// # Errors
    ///
    /// [`RingError::Cancelled`] if the ring was cancelled concurrently.
    pub fn commit_pop(&mut self) -> Result<(), RingError> {
        // SAFETY: single-consumer contract, as above.
        unsafe { self.ring.commit_pop() }
    }

    /// Cancels the ring. See [`Canceller::cancel`].
    pub fn cancel(&self) {
        self.ring.cancel();
    }

    /// Returns a clonable handle that can cancel the ring from any thread.
    #[must_use]
    pub fn canceller(&self) -> Canceller<T, N> {
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
    fn fifo_per_producer() {
        let (sender, mut receiver) = channel::<u64, 16>();

        for i in 0..10 {
            sender.push(i).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 10 {
            let batch = receiver.try_peek(4).unwrap();
            seen.extend_from_slice(batch);
            receiver.commit_pop().unwrap();
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn try_push_reports_full() {
        let (sender, mut receiver) = channel::<u64, 4>();

        sender.try_push(1).unwrap();
        sender.try_push(2).unwrap();
        sender.try_push(3).unwrap();
        assert_eq!(sender.try_push(4).unwrap_err(), RingError::Full);

        let batch = receiver.try_peek(1).unwrap();
        assert_eq!(batch, &[1]);
        receiver.commit_pop().unwrap();

        sender.try_push(4).unwrap();
        assert_eq!(sender.try_push(5).unwrap_err(), RingError::Full);
    }

    #[test]
    fn try_peek_reports_empty() {
        let (_sender, mut receiver) = channel::<u64, 4>();
        assert_eq!(receiver.try_peek(1).unwrap_err(), RingError::Empty);
    }

    #[test]
    fn blocked_consumer_wakes_on_push() {
        let (sender, mut receiver) = channel::<u64, 8>();

        let consumer = thread::spawn(move || {
            let batch = receiver.peek(8).unwrap();
            let value = batch[0];
            receiver.commit_pop().unwrap();
            value
        });

        thread::sleep(Duration::from_millis(20));
        sender.push(77).unwrap();

        assert_eq!(consumer.join().unwrap(), 77);
    }

    #[test]
    fn blocked_producer_wakes_on_commit_pop() {
        let (sender, mut receiver) = channel::<u64, 4>();

        for i in 0..3 {
            sender.push(i).unwrap();
        }

        let producer = thread::spawn(move || sender.push(3));

        thread::sleep(Duration::from_millis(20));
        let batch = receiver.peek(1).unwrap();
        assert_eq!(batch, &[0]);
        receiver.commit_pop().unwrap();

        assert!(producer.join().unwrap().is_ok());
        let stats = receiver.ring.write_stats();
        assert!(stats.wait_count >= 1);
    }

    #[test]
    fn cancel_unblocks_producers_and_consumer() {
        let (sender, mut receiver) = channel::<u64, 4>();
        let canceller = sender.canceller();

        for i in 0..3 {
            sender.push(i).unwrap();
        }

        let producer = thread::spawn(move || sender.push(99).unwrap_err());

        thread::sleep(Duration::from_millis(20));
        canceller.cancel();

        assert_eq!(producer.join().unwrap(), RingError::Cancelled);
        assert_eq!(receiver.peek(1).unwrap_err(), RingError::Cancelled);
    }

    #[test]
    fn stats_report_depth_high_water() {
        let (sender, _receiver) = channel::<u64, 16>();
        for i in 0..5 {
            sender.push(i).unwrap();
        }
        assert_eq!(sender.write_stats().max_queued, 5);
    }
}
