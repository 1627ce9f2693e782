//! Lock-free ring buffers for low-latency inter-thread handoff.
//!
//! Two independent primitives, each self-contained:
//!
//! - [`sync::spsc`] — a single-producer/single-consumer bounded element
//!   ring with **zero-copy** in-place production and consumption: both
//!   sides borrow regions of the ring's own storage through a two-phase
//!   acquire/commit API.
//! - [`sync::mpsc`] — a many-producer/single-consumer bounded ring of
//!   copyable elements with contiguous batched peek on the consumer side.
//!
//! Both rings have wait-free fast paths, coordinate with compare-and-swap
//! under release/acquire orderings, and block only through a futex-backed
//! atomic wait — no mutex exists anywhere. Cancellation installs negative
//! sentinel indices through the same CAS machinery, wakes every waiter,
//! and permanently fails all later operations.

pub mod error;
pub(crate) mod mpsc;
pub(crate) mod spsc;
pub mod sync;
pub(crate) mod trace;

pub use error::RingError;
pub use trace::init_tracing;
