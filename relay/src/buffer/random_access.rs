//! Bounded buffer addressed by explicit slot index.
//!
//! Each slot is a one-deep lane with its own handshake, so a slot is never
//! read before it is written and never overwritten before it is read, while
//! different slots are written and consumed independently of each other.
//! There is no ordering between slots.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{BufferError, CircularBuffer, Delivery, Inbound, Interrupted, Outbound};
use crate::sync::ShutdownFlag;

/// Fixed-capacity buffer whose slots are addressed by the caller.
#[derive(Debug)]
pub struct RandomAccessBuffer<T> {
    lanes: Box<[CircularBuffer<T>]>,
}

impl<T> RandomAccessBuffer<T> {
    /// Creates a buffer with `capacity` independently synchronized slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be at least 1");
        let lanes = (0..capacity).map(|_| CircularBuffer::new(1)).collect();
        Self { lanes }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lanes.len()
    }

    fn lane(&self, index: usize) -> Result<&CircularBuffer<T>, BufferError> {
        self.lanes.get(index).ok_or(BufferError::IndexOutOfRange {
            index,
            capacity: self.lanes.len(),
        })
    }

    /// Blocking write into slot `index` with no shutdown check.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::IndexOutOfRange`] for an index past the capacity.
    pub fn write_at(&self, index: usize, value: T) -> Result<(), BufferError> {
        self.lane(index)?.push(value);
        Ok(())
    }

    /// Blocking read from slot `index` with no shutdown check.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::IndexOutOfRange`] for an index past the capacity.
    pub fn read_at(&self, index: usize) -> Result<Option<T>, BufferError> {
        Ok(self.lane(index)?.pop())
    }

    /// Whether slot `index` holds a value waiting to be read.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::IndexOutOfRange`] for an index past the capacity.
    pub fn is_filled(&self, index: usize) -> Result<bool, BufferError> {
        Ok(self.lane(index)?.filled_slots() > 0)
    }

    /// Free slots across the whole buffer.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.lanes.iter().map(CircularBuffer::free_slots).sum()
    }

    /// Filled slots across the whole buffer.
    #[must_use]
    pub fn filled_slots(&self) -> usize {
        self.lanes.iter().map(CircularBuffer::filled_slots).sum()
    }

    /// Compensating release for `n` blocked producers on every slot.
    pub fn wake_producers(&self, n: usize) {
        self.lanes.iter().for_each(|lane| lane.wake_producers(n));
    }

    /// Compensating release for `n` blocked consumers on every slot.
    pub fn wake_consumers(&self, n: usize) {
        self.lanes.iter().for_each(|lane| lane.wake_consumers(n));
    }

    /// The slots owned by `member` out of `members` sharing this buffer,
    /// usable as a stage's [`Inbound`]/[`Outbound`].
    ///
    /// With at most `capacity` members, member `m` owns every slot `i` with
    /// `i % members == m`, so the members between them use every slot. With
    /// more members than slots, member `m` shares slot `m % capacity`.
    ///
    /// Each call returns a group with its own rotation: the writer side and
    /// the reader side of one member each take their own group.
    pub fn group(self: &Arc<Self>, member: usize, members: usize) -> LaneGroup<T> {
        let members = members.max(1);
        let capacity = self.capacity();
        let slots: Vec<usize> = if members <= capacity {
            ((member % members)..capacity).step_by(members).collect()
        } else {
            vec![member % capacity]
        };
        let lanes = slots
            .into_iter()
            .map(|index| Lane {
                buffer: Arc::clone(self),
                index,
            })
            .collect();
        LaneGroup {
            lanes,
            next: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
struct Lane<T> {
    buffer: Arc<RandomAccessBuffer<T>>,
    index: usize,
}

impl<T> Lane<T> {
    fn inner(&self) -> &CircularBuffer<T> {
        // `group` only builds lanes below the capacity and the slice never
        // shrinks.
        &self.buffer.lanes[self.index]
    }
}

/// A member's slots of a [`RandomAccessBuffer`], visited in rotation.
///
/// Writer and reader walk the same slots in the same order, so the values
/// addressed to one member are read in the order their turns were drawn.
#[derive(Debug)]
pub struct LaneGroup<T> {
    lanes: Box<[Lane<T>]>,
    next: AtomicUsize,
}

impl<T> LaneGroup<T> {
    /// Slot indices owned by this group, in visiting order.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.lanes.iter().map(|lane| lane.index)
    }

    fn next_lane(&self) -> &CircularBuffer<T> {
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        self.lanes[turn % self.lanes.len()].inner()
    }
}

impl<T> Inbound<T> for LaneGroup<T> {
    fn receive(&self, shutdown: &ShutdownFlag) -> Delivery<T> {
        self.next_lane().receive(shutdown)
    }
}

impl<T> Outbound<T> for LaneGroup<T> {
    fn send(&self, value: T, shutdown: &ShutdownFlag) -> Result<(), Interrupted<T>> {
        self.next_lane().send(value, shutdown)
    }
}
