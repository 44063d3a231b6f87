//! Workload injection into the client tier.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::buffer::{LaneGroup, Outbound, RandomAccessBuffer};
use crate::operation::{OpId, Operation};
use crate::sync::ShutdownFlag;
use crate::trace::{debug, trace};

/// How the dispatcher picks the client an operation is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    /// Clients in turn.
    #[default]
    RoundRobin,
    /// Uniformly random client.
    Random,
    /// Always the given client (modulo the client count).
    Fixed(usize),
}

impl Route {
    fn select(self, turn: usize, clients: usize) -> usize {
        match self {
            Self::RoundRobin => turn % clients,
            Self::Random => rand::rng().random_range(0..clients),
            Self::Fixed(client) => client % clients,
        }
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => other
                .strip_prefix("fixed:")
                .and_then(|n| n.parse().ok())
                .map(Self::Fixed)
                .ok_or_else(|| {
                    format!("unknown route `{other}`, expected round-robin, random or fixed:<n>")
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Every id in `0..max_ops` has been handed out.
    #[error("operation id space exhausted ({max_ops} operations)")]
    IdSpaceExhausted { max_ops: usize },
    /// The pipeline is shutting down; nothing was written.
    #[error("pipeline is shutting down")]
    ShutDown,
}

/// Hands out sequential operation ids and writes each new operation into
/// the next dispatcher-to-client slot owned by its target client (see
/// [`RandomAccessBuffer::group`]).
///
/// Shared by reference; any number of threads may dispatch concurrently.
#[derive(Debug)]
pub struct Dispatcher {
    buffer: Arc<RandomAccessBuffer<Operation>>,
    /// Writer-side slot groups, one per client.
    targets: Box<[LaneGroup<Operation>]>,
    max_ops: usize,
    route: Route,
    next_id: AtomicI32,
    turn: AtomicUsize,
    /// Callers currently inside `dispatch`, for compensating wake-ups.
    in_flight: AtomicUsize,
    shutdown: ShutdownFlag,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        buffer: Arc<RandomAccessBuffer<Operation>>,
        clients: usize,
        max_ops: usize,
        route: Route,
        shutdown: ShutdownFlag,
    ) -> Self {
        let clients = clients.max(1);
        let targets = (0..clients)
            .map(|client| buffer.group(client, clients))
            .collect();
        Self {
            buffer,
            targets,
            max_ops: max_ops.min(i32::MAX as usize),
            route,
            next_id: AtomicI32::new(0),
            turn: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            shutdown,
        }
    }

    /// Creates, stamps and enqueues the next operation.
    ///
    /// Blocks while the target client's next slot is still occupied.
    ///
    /// # Errors
    ///
    /// [`DispatchError::IdSpaceExhausted`] once `max_ops` ids have been used,
    /// [`DispatchError::ShutDown`] if shutdown is requested before or during
    /// the write. An id consumed by an interrupted write is not reused.
    pub fn dispatch(&self) -> Result<OpId, DispatchError> {
        if self.shutdown.is_requested() {
            return Err(DispatchError::ShutDown);
        }
        let id = self.allocate_id()?;
        let client = self
            .route
            .select(self.turn.fetch_add(1, Ordering::Relaxed), self.targets.len());

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let sent = if self.shutdown.is_requested() {
            Err(DispatchError::ShutDown)
        } else {
            self.targets[client]
                .send(Operation::dispatched(id), &self.shutdown)
                .map_err(|_| DispatchError::ShutDown)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match sent {
            Ok(()) => {
                trace!(%id, client, "dispatched");
                Ok(id)
            }
            Err(err) => {
                debug!(%id, "dispatch interrupted by shutdown");
                Err(err)
            }
        }
    }

    fn allocate_id(&self) -> Result<OpId, DispatchError> {
        let max = i32::try_from(self.max_ops).unwrap_or(i32::MAX);
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next < max).then_some(next + 1)
            })
            .map(OpId::new)
            .map_err(|_| DispatchError::IdSpaceExhausted {
                max_ops: self.max_ops,
            })
    }

    /// Releases every dispatcher blocked on a full slot. Call after setting
    /// the shutdown flag.
    pub(crate) fn wake_blocked(&self) {
        let blocked = self.in_flight.load(Ordering::SeqCst);
        if blocked > 0 {
            debug!(blocked, "waking blocked dispatchers");
            self.buffer.wake_producers(blocked);
        }
    }
}
