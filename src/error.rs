//! Error taxonomy shared by both rings.
//!
//! Every fallible ring operation reports one of these values; there is no
//! internal retry and no panic on the hot path. `Empty` and `Full` are
//! transient (the caller retries later), `TooLarge` and `Overcommit` flag
//! programmer errors without touching ring state, and `Cancelled` is
//! terminal.

use thiserror::Error;

/// Result values for ring operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Non-blocking read found nothing published.
    #[error("ring is empty")]
    Empty,

    /// Non-blocking write found no free space.
    #[error("ring is full")]
    Full,

    /// Requested more than half the ring capacity in one acquire.
    #[error("requested region exceeds half the ring capacity")]
    TooLarge,

    /// Commit length exceeds the region returned by the last acquire.
    #[error("commit exceeds the last acquired region")]
    Overcommit,

    /// The ring was cancelled; every subsequent operation fails.
    #[error("ring has been cancelled")]
    Cancelled,
}
