//! Free/filled semaphore pair implementing the bounded-buffer protocol.
//!
//! For a buffer of capacity `N`:
//!
//! ```text
//!   producer                          consumer
//!   produce_begin: free   -= 1 (wait)  consume_begin: filled -= 1 (wait)
//!   ... write slot ...                ... read slot ...
//!   produce_end:   filled += 1         consume_end:   free   += 1
//! ```
//!
//! Between `begin` and `end` the caller holds a claim on one slot: the slot
//! is counted in neither `free` nor `filled`, so at every instant
//! `free + filled + claimed == N`. With no claim outstanding this reduces to
//! `free + filled == N`.
//!
//! The raw begin/end calls here do not enforce pairing; the buffers wrap them
//! in claim guards whose `Drop` performs the matching `end`.

use super::{Semaphore, Timeout};

/// Paired producer/consumer semaphores for one bounded buffer.
#[derive(Debug)]
pub struct Handshake {
    capacity: usize,
    free: Semaphore,
    filled: Semaphore,
}

impl Handshake {
    /// Creates the handshake for a buffer of `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "handshake capacity must be at least 1");
        Self {
            capacity,
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
        }
    }

    /// Number of slots the handshake guards.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a slot is free and claims it for writing.
    pub fn produce_begin(&self) {
        self.free.acquire();
    }

    /// Claims a free slot, giving up after `timeout`.
    #[must_use]
    pub fn produce_begin_timeout(&self, timeout: Timeout) -> bool {
        self.free.acquire_timeout(timeout)
    }

    /// Publishes a written slot to the consumer side.
    pub fn produce_end(&self) {
        self.filled.release();
    }

    /// Blocks until a slot is filled and claims it for reading.
    pub fn consume_begin(&self) {
        self.filled.acquire();
    }

    /// Claims a filled slot, giving up after `timeout`.
    #[must_use]
    pub fn consume_begin_timeout(&self, timeout: Timeout) -> bool {
        self.filled.acquire_timeout(timeout)
    }

    /// Returns a read slot to the producer side.
    pub fn consume_end(&self) {
        self.free.release();
    }

    /// Compensating release for `n` producers blocked in `produce_begin`.
    ///
    /// Only meaningful during shutdown: the woken producers must observe the
    /// shutdown flag and skip their slot access.
    pub fn wake_producers(&self, n: usize) {
        self.free.release_many(n);
    }

    /// Compensating release for `n` consumers blocked in `consume_begin`.
    ///
    /// Only meaningful during shutdown, see [`Handshake::wake_producers`].
    pub fn wake_consumers(&self, n: usize) {
        self.filled.release_many(n);
    }

    /// Slots currently free for producers.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.free.available()
    }

    /// Slots currently filled and waiting for consumers.
    #[must_use]
    pub fn filled_slots(&self) -> usize {
        self.filled.available()
    }
}
