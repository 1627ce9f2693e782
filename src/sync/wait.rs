//! Futex-backed wait/notify for the ring index atomics.
//!
//! Each waitable pairs an atomic value with a 32-bit generation word (the
//! *monitor*). `wait(expected)` parks the thread on the monitor only while
//! the value still equals `expected`; `notify_one`/`notify_all` bump the
//! generation *before* waking, so a thread that checked its value and is
//! about to sleep observes the bumped generation and returns instead of
//! missing the wakeup. This extends the kernel's 32-bit futex word to the
//! 64-bit indices the rings need.
//!
//! Spurious returns from `wait` are permitted; every caller re-checks its
//! condition in a loop. No mutex exists anywhere on these paths.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

#[cfg(target_os = "linux")]
mod park {
    use std::sync::atomic::AtomicU32;

    use rustix::thread::futex;

    /// Sleeps until the monitor word moves away from `expected`, a wake
    /// arrives, or the kernel returns spuriously.
    pub(super) fn wait(monitor: &AtomicU32, expected: u32) {
        // AGAIN means the word already moved, INTR means a signal landed.
        // Either way the caller re-checks its condition.
        let _ = futex::wait(monitor, futex::Flags::PRIVATE, expected, None);
    }

    pub(super) fn wake_one(monitor: &AtomicU32) {
        let _ = futex::wake(monitor, futex::Flags::PRIVATE, 1);
    }

    pub(super) fn wake_all(monitor: &AtomicU32) {
        let _ = futex::wake(monitor, futex::Flags::PRIVATE, i32::MAX as u32);
    }
}

#[cfg(not(target_os = "linux"))]
mod park {
    use std::sync::atomic::{AtomicU32, Ordering};

    const SPIN_CAP: u32 = 128;
    const YIELD_CAP: u32 = 64;

    /// Bounded spin, then yield, then coarse sleep, re-checking the monitor
    /// word each step. Same contract as the futex path: returns once the
    /// word has moved, or spuriously.
    pub(super) fn wait(monitor: &AtomicU32, expected: u32) {
        let mut spins = 0u32;
        let mut yields = 0u32;
        while monitor.load(Ordering::Acquire) == expected {
            if spins < SPIN_CAP {
                std::hint::spin_loop();
                spins += 1;
            } else if yields < YIELD_CAP {
                std::thread::yield_now();
                yields += 1;
            } else {
                std::thread::sleep(std::time::Duration::from_micros(50));
            }
        }
    }

    // Polling waiters observe the generation bump directly.
    pub(super) fn wake_one(_monitor: &AtomicU32) {}

    pub(super) fn wake_all(_monitor: &AtomicU32) {}
}

macro_rules! waitable {
    ($(#[$meta:meta])* $name:ident, $atomic:ty, $int:ty) => {
        $(#[$meta])*
        #[repr(C)]
        pub(crate) struct $name {
            value: $atomic,
            monitor: AtomicU32,
        }

        impl $name {
            pub(crate) const fn new(value: $int) -> Self {
                Self {
                    value: <$atomic>::new(value),
                    monitor: AtomicU32::new(0),
                }
            }

            #[inline]
            pub(crate) fn load(&self, order: Ordering) -> $int {
                self.value.load(order)
            }

            #[cfg(test)]
            pub(crate) fn store(&self, value: $int, order: Ordering) {
                self.value.store(value, order);
            }

            #[inline]
            pub(crate) fn compare_exchange(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                self.value.compare_exchange(current, new, success, failure)
            }

            #[inline]
            pub(crate) fn compare_exchange_weak(
                &self,
                current: $int,
                new: $int,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$int, $int> {
                self.value.compare_exchange_weak(current, new, success, failure)
            }

            /// Blocks while the value equals `expected`. May return
            /// spuriously; callers re-check their condition.
            pub(crate) fn wait(&self, expected: $int) {
                let generation = self.monitor.load(Ordering::Relaxed);
                if self.value.load(Ordering::Relaxed) != expected {
                    return;
                }
                park::wait(&self.monitor, generation);
            }

            /// Wakes one waiter. The generation bump precedes the wake so a
            /// thread between its value check and the sleep cannot miss it.
            #[inline]
            pub(crate) fn notify_one(&self) {
                self.monitor.fetch_add(1, Ordering::Release);
                park::wake_one(&self.monitor);
            }

            /// Wakes every waiter.
            #[inline]
            pub(crate) fn notify_all(&self) {
                self.monitor.fetch_add(1, Ordering::Release);
                park::wake_all(&self.monitor);
            }
        }
    };
}

waitable!(
    /// 64-bit waitable atomic; holds the packed SPSC writer context.
    WaitableU64,
    AtomicU64,
    u64
);

waitable!(
    /// Signed 64-bit waitable atomic; holds the MPSC ring indices.
    WaitableI64,
    AtomicI64,
    i64
);

waitable!(
    /// Signed 32-bit waitable atomic; holds the SPSC reader index.
    WaitableI32,
    AtomicI32,
    i32
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_immediately_on_mismatch() {
        let w = WaitableI32::new(5);
        // Value is 5, expected 7: no sleep.
        w.wait(7);
    }

    #[test]
    fn notify_wakes_waiter() {
        let w = Arc::new(WaitableI64::new(0));

        let waiter = {
            let w = Arc::clone(&w);
            thread::spawn(move || {
                while w.load(Ordering::Acquire) == 0 {
                    w.wait(0);
                }
                w.load(Ordering::Acquire)
            })
        };

        thread::sleep(Duration::from_millis(20));
        w.store(42, Ordering::Release);
        w.notify_one();

        assert_eq!(waiter.join().unwrap(), 42);
    }

    #[test]
    fn notify_all_wakes_every_waiter() {
        let w = Arc::new(WaitableU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let w = Arc::clone(&w);
            handles.push(thread::spawn(move || {
                while w.load(Ordering::Acquire) == 0 {
                    w.wait(0);
                }
            }));
        }

        thread::sleep(Duration::from_millis(20));
        w.store(1, Ordering::Release);
        w.notify_all();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn missed_wake_race_is_closed_by_generation() {
        // Hammer the notify/wait handshake; a lost wakeup would hang here.
        let w = Arc::new(WaitableI32::new(0));

        for round in 0..200 {
            let w2 = Arc::clone(&w);
            let waiter = thread::spawn(move || {
                while w2.load(Ordering::Acquire) != round + 1 {
                    w2.wait(round);
                }
            });
            w.store(round + 1, Ordering::Release);
            w.notify_one();
            waiter.join().unwrap();
        }
    }
}
