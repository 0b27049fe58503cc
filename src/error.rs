//! Error types for the ring and channel.
//!
//! All fallible operations on [`crate::ring::Ring`] and
//! [`crate::channel::Channel`] return [`Result`] rather than panicking or
//! aborting; the core never logs or retries on their behalf.

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Error taxonomy for the ring-decomposed queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// `reserve` failed: the ring is full, or `n` is zero or exceeds capacity.
    /// Transient — the caller may retry once the consumer makes progress.
    #[error("ring has no free capacity for the requested reservation")]
    NoCapacity,

    /// `register` was called on a channel that has already been closed.
    /// Permanent for that channel.
    #[error("channel is closed")]
    Closed,

    /// `register` was called after `max_producers` producers already
    /// registered. Permanent for that channel.
    #[error("channel already has the maximum number of registered producers")]
    TooManyProducers,

    /// `reserve_with_backoff` gave up waiting for capacity. Equivalent to
    /// [`QueueError::NoCapacity`] with the hint that the consumer is lagging.
    #[error("reserve_with_backoff gave up waiting for capacity")]
    BackoffExhausted,

    /// `reserve` was called again before a previous [`crate::ring::Reservation`]
    /// from the same producer was committed or dropped. Indicates a bug in the
    /// calling code, not backpressure — retrying without fixing the caller
    /// won't help.
    #[error("a reservation from a previous reserve call is still outstanding")]
    ReservationInProgress,
}

impl QueueError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::NoCapacity | Self::BackoffExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_matches_taxonomy() {
        assert!(QueueError::NoCapacity.is_recoverable());
        assert!(QueueError::BackoffExhausted.is_recoverable());
        assert!(!QueueError::Closed.is_recoverable());
        assert!(!QueueError::TooManyProducers.is_recoverable());
        assert!(!QueueError::ReservationInProgress.is_recoverable());
    }
}
