//! Results table: finalized operations keyed by id.
//!
//! One mutex serializes every access. The table is sized once, at pipeline
//! start, to the operation id space and never grows or evicts.

use parking_lot::{Condvar, Mutex};

use crate::operation::{OpId, Operation};
use crate::sync::Timeout;

/// Errors from indexing the results table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResultsError {
    /// The placeholder id (`-1`) was presented for recording.
    #[error("placeholder operation cannot be recorded")]
    InvalidId,
    /// The id does not fit the table.
    #[error("operation id {id} out of range for results table of capacity {capacity}")]
    IdOutOfRange { id: OpId, capacity: usize },
}

#[derive(Debug)]
struct Table {
    slots: Box<[Option<Operation>]>,
    finalized: usize,
}

/// Mutex-protected mapping from operation id to finalized record.
#[derive(Debug)]
pub struct ResultsTable {
    table: Mutex<Table>,
    recorded: Condvar,
}

impl ResultsTable {
    /// Creates an empty table for ids `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(Table {
                slots: vec![None; capacity].into_boxed_slice(),
                finalized: 0,
            }),
            recorded: Condvar::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.lock().slots.len()
    }

    /// Stores `op` at `table[op.id]`, overwriting any earlier record.
    ///
    /// # Errors
    ///
    /// [`ResultsError::InvalidId`] for a placeholder and
    /// [`ResultsError::IdOutOfRange`] for an id outside the table. Nothing is
    /// written in either case.
    pub fn record(&self, op: Operation) -> Result<(), ResultsError> {
        let id = op.id();
        if !id.is_valid() {
            return Err(ResultsError::InvalidId);
        }

        let mut table = self.table.lock();
        let capacity = table.slots.len();
        let slot = id
            .index()
            .and_then(|index| table.slots.get_mut(index))
            .ok_or(ResultsError::IdOutOfRange { id, capacity })?;

        if slot.replace(op).is_none() {
            table.finalized += 1;
        }
        drop(table);
        self.recorded.notify_all();
        Ok(())
    }

    /// Copy of the record stored for `id`, if one has been finalized.
    ///
    /// # Errors
    ///
    /// [`ResultsError::IdOutOfRange`] for an id outside the table, including
    /// the placeholder.
    pub fn read(&self, id: OpId) -> Result<Option<Operation>, ResultsError> {
        let table = self.table.lock();
        id.index()
            .and_then(|index| table.slots.get(index))
            .copied()
            .ok_or(ResultsError::IdOutOfRange {
                id,
                capacity: table.slots.len(),
            })
    }

    /// Number of distinct ids holding a finalized record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().finalized
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every finalized record, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Operation> {
        self.table.lock().slots.iter().flatten().copied().collect()
    }

    /// Blocks until at least `count` records are finalized.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub fn wait_for(&self, count: usize, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut table = self.table.lock();
        while table.finalized < count {
            match deadline {
                None => self.recorded.wait(&mut table),
                Some(deadline) => {
                    let now = minstant::Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let _ = self
                        .recorded
                        .wait_for(&mut table, deadline.duration_since(now));
                }
            }
        }
        true
    }

    /// Wakes every [`wait_for`](Self::wait_for) caller so it re-checks its
    /// condition.
    pub(crate) fn notify_waiters(&self) {
        self.recorded.notify_all();
    }
}
