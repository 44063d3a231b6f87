//! Bounded buffers connecting adjacent pipeline stages.
//!
//! Two variants share one slot and handshake model:
//!
//! - [`CircularBuffer`] - FIFO, rotating write and read cursors
//! - [`RandomAccessBuffer`] - explicit index per access, per-slot ordering
//!
//! Access is claim based. `produce_begin` / `consume_begin` block on the
//! [`Handshake`](crate::sync::Handshake) and return a claim guard; the slot is
//! touched through the guard and the matching `end` runs when the guard is
//! dropped. A claim abandoned on shutdown skips its `end`, so a compensating
//! release never turns into a phantom filled or free slot.
//!
//! Stages do not use claims directly. They go through the [`Inbound`] and
//! [`Outbound`] seams, which re-check the shutdown flag after every wake-up
//! and abandon the access when it is set.

mod circular;
mod random_access;
mod slot;

use std::sync::Arc;

use crate::sync::ShutdownFlag;

pub use circular::{CircularBuffer, ReadClaim, WriteClaim};
pub use random_access::{LaneGroup, RandomAccessBuffer};

/// Errors from explicitly indexed buffer access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The index does not address a slot of the buffer.
    #[error("slot index {index} out of range for buffer of capacity {capacity}")]
    IndexOutOfRange { index: usize, capacity: usize },
}

/// Outcome of a shutdown-aware read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<T> {
    /// A value was read from the claimed slot.
    Item(T),
    /// The claimed slot held nothing (its write claim was dropped unwritten).
    Vacant,
    /// Shutdown was observed after waking; the slot was not touched.
    Interrupted,
}

/// A write abandoned because shutdown was observed after waking.
///
/// Carries the value back to the caller, like a failed `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted<T>(pub T);

/// Read side of a hop between two stages.
pub trait Inbound<T> {
    /// Claims a filled slot (blocking), re-checks `shutdown`, then reads.
    fn receive(&self, shutdown: &ShutdownFlag) -> Delivery<T>;
}

/// Write side of a hop between two stages.
pub trait Outbound<T> {
    /// Claims a free slot (blocking), re-checks `shutdown`, then writes.
    ///
    /// # Errors
    ///
    /// Returns the value back if shutdown was observed after waking.
    fn send(&self, value: T, shutdown: &ShutdownFlag) -> Result<(), Interrupted<T>>;
}

impl<T, B: Inbound<T> + ?Sized> Inbound<T> for Arc<B> {
    fn receive(&self, shutdown: &ShutdownFlag) -> Delivery<T> {
        (**self).receive(shutdown)
    }
}

impl<T, B: Outbound<T> + ?Sized> Outbound<T> for Arc<B> {
    fn send(&self, value: T, shutdown: &ShutdownFlag) -> Result<(), Interrupted<T>> {
        (**self).send(value, shutdown)
    }
}

impl<T, B: Inbound<T> + ?Sized> Inbound<T> for &B {
    fn receive(&self, shutdown: &ShutdownFlag) -> Delivery<T> {
        (**self).receive(shutdown)
    }
}

impl<T, B: Outbound<T> + ?Sized> Outbound<T> for &B {
    fn send(&self, value: T, shutdown: &ShutdownFlag) -> Result<(), Interrupted<T>> {
        (**self).send(value, shutdown)
    }
}
