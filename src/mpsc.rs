//! Core MPSC (Multi-Producer Single-Consumer) ring primitives.
//!
//! Unlike SPSC, any number of producers may push concurrently; delivery
//! order across producers follows the reservation CAS. The safe handle
//! layer lives in [`crate::sync::mpsc`].

pub(crate) mod ring;
