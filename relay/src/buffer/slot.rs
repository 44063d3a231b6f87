//! Storage cell for one buffer slot.

use parking_lot::Mutex;

/// A single slot in a bounded buffer.
///
/// The handshake already guarantees that a producer and a consumer never
/// claim the same slot, so the lock is uncontended on the normal path. It
/// keeps the slot sound when a compensating release lets a woken stage hold a
/// claim the protocol did not grant.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    pub(crate) const fn empty() -> Self {
        Self {
            value: parking_lot::const_mutex(None),
        }
    }

    /// Moves `value` into the slot, dropping any value left behind.
    pub(crate) fn put(&self, value: T) {
        *self.value.lock() = Some(value);
    }

    /// Moves the value out, leaving the slot empty.
    pub(crate) fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn is_occupied(&self) -> bool {
        self.value.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_take_moves_value() {
        let slot = Slot::empty();
        assert!(!slot.is_occupied());

        slot.put(String::from("op"));
        assert!(slot.is_occupied());
        assert_eq!(slot.take().as_deref(), Some("op"));
        assert!(!slot.is_occupied());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn put_overwrites_stale_value() {
        let slot = Slot::empty();
        slot.put(1);
        slot.put(2);
        assert_eq!(slot.take(), Some(2));
    }
}
