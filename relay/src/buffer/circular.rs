//! FIFO bounded buffer with rotating cursors.
//!
//! The write cursor and read cursor increase monotonically; the slot index
//! is `cursor % capacity`. A producer holds the write-cursor lock for the
//! whole of its claim and a consumer holds the read-cursor lock for the whole
//! of its claim, so there is at most one writer and one reader at a time and
//! they proceed concurrently. The handshake keeps the cursors from lapping:
//! the K-th completed write is read by the K-th completed read.

use parking_lot::{Mutex, MutexGuard};

use super::slot::Slot;
use super::{Delivery, Inbound, Interrupted, Outbound};
use crate::sync::{Handshake, ShutdownFlag, Timeout};

/// Fixed-capacity FIFO buffer guarded by a [`Handshake`].
#[derive(Debug)]
pub struct CircularBuffer<T> {
    handshake: Handshake,
    slots: Box<[Slot<T>]>,
    write_cursor: Mutex<u64>,
    read_cursor: Mutex<u64>,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty buffer with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let handshake = Handshake::new(capacity);
        let slots = (0..capacity).map(|_| Slot::empty()).collect();
        Self {
            handshake,
            slots,
            write_cursor: Mutex::new(0),
            read_cursor: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The handshake guarding this buffer.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.handshake.free_slots()
    }

    #[must_use]
    pub fn filled_slots(&self) -> usize {
        self.handshake.filled_slots()
    }

    /// Blocks for a free slot and claims it for writing.
    pub fn produce_begin(&self) -> WriteClaim<'_, T> {
        self.handshake.produce_begin();
        WriteClaim {
            buffer: self,
            cursor: self.write_cursor.lock(),
            publish: true,
        }
    }

    /// Like [`produce_begin`](Self::produce_begin) but gives up after `timeout`.
    pub fn produce_begin_timeout(&self, timeout: Timeout) -> Option<WriteClaim<'_, T>> {
        self.handshake
            .produce_begin_timeout(timeout)
            .then(|| WriteClaim {
                buffer: self,
                cursor: self.write_cursor.lock(),
                publish: true,
            })
    }

    /// Blocks for a filled slot and claims it for reading.
    pub fn consume_begin(&self) -> ReadClaim<'_, T> {
        self.handshake.consume_begin();
        ReadClaim {
            buffer: self,
            cursor: self.read_cursor.lock(),
            release: true,
        }
    }

    /// Like [`consume_begin`](Self::consume_begin) but gives up after `timeout`.
    pub fn consume_begin_timeout(&self, timeout: Timeout) -> Option<ReadClaim<'_, T>> {
        self.handshake
            .consume_begin_timeout(timeout)
            .then(|| ReadClaim {
                buffer: self,
                cursor: self.read_cursor.lock(),
                release: true,
            })
    }

    /// Blocking write with no shutdown check.
    pub fn push(&self, value: T) {
        self.produce_begin().write(value);
    }

    /// Blocking read with no shutdown check.
    ///
    /// Returns `None` only if the slot was released without being written.
    pub fn pop(&self) -> Option<T> {
        self.consume_begin().read()
    }

    /// Compensating release for `n` blocked producers (shutdown only).
    pub fn wake_producers(&self, n: usize) {
        self.handshake.wake_producers(n);
    }

    /// Compensating release for `n` blocked consumers (shutdown only).
    pub fn wake_consumers(&self, n: usize) {
        self.handshake.wake_consumers(n);
    }

    fn slot(&self, cursor: u64) -> &Slot<T> {
        // Lossless: the remainder is below `capacity`, itself a usize.
        let index = (cursor % self.slots.len() as u64) as usize;
        &self.slots[index]
    }
}

/// Exclusive claim on the next free slot.
///
/// Dropping the claim advances the write cursor and publishes the slot
/// (`produce_end`). An [abandoned](Self::abandon) claim does neither.
#[must_use = "dropping a claim publishes the slot"]
pub struct WriteClaim<'a, T> {
    buffer: &'a CircularBuffer<T>,
    cursor: MutexGuard<'a, u64>,
    publish: bool,
}

impl<T> WriteClaim<'_, T> {
    /// Slot index this claim addresses.
    #[must_use]
    pub fn index(&self) -> usize {
        (*self.cursor % self.buffer.capacity() as u64) as usize
    }

    /// Moves `value` into the claimed slot and publishes it.
    pub fn write(self, value: T) {
        self.buffer.slot(*self.cursor).put(value);
    }

    /// Gives the claim up without writing, publishing or advancing the
    /// cursor. The free permit stays consumed, so this is only for a
    /// producer leaving on shutdown.
    pub fn abandon(mut self) {
        self.publish = false;
    }
}

impl<T> Drop for WriteClaim<'_, T> {
    fn drop(&mut self) {
        if self.publish {
            *self.cursor = self.cursor.wrapping_add(1);
            self.buffer.handshake.produce_end();
        }
    }
}

/// Exclusive claim on the oldest filled slot.
///
/// Dropping the claim advances the read cursor and frees the slot
/// (`consume_end`). An [abandoned](Self::abandon) claim does neither.
#[must_use = "dropping a claim frees the slot"]
pub struct ReadClaim<'a, T> {
    buffer: &'a CircularBuffer<T>,
    cursor: MutexGuard<'a, u64>,
    release: bool,
}

impl<T> ReadClaim<'_, T> {
    /// Slot index this claim addresses.
    #[must_use]
    pub fn index(&self) -> usize {
        (*self.cursor % self.buffer.capacity() as u64) as usize
    }

    /// Moves the value out of the claimed slot and frees it.
    pub fn read(self) -> Option<T> {
        self.buffer.slot(*self.cursor).take()
    }

    /// Gives the claim up without reading, freeing or advancing the cursor.
    /// The value stays in its slot; only for a consumer leaving on shutdown.
    pub fn abandon(mut self) {
        self.release = false;
    }
}

impl<T> Drop for ReadClaim<'_, T> {
    fn drop(&mut self) {
        if self.release {
            *self.cursor = self.cursor.wrapping_add(1);
            self.buffer.handshake.consume_end();
        }
    }
}

impl<T> Inbound<T> for CircularBuffer<T> {
    fn receive(&self, shutdown: &ShutdownFlag) -> Delivery<T> {
        let claim = self.consume_begin();
        if shutdown.is_requested() {
            claim.abandon();
            return Delivery::Interrupted;
        }
        claim.read().map_or(Delivery::Vacant, Delivery::Item)
    }
}

impl<T> Outbound<T> for CircularBuffer<T> {
    fn send(&self, value: T, shutdown: &ShutdownFlag) -> Result<(), Interrupted<T>> {
        let claim = self.produce_begin();
        if shutdown.is_requested() {
            claim.abandon();
            return Err(Interrupted(value));
        }
        claim.write(value);
        Ok(())
    }
}
