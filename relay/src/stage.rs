//! Stage workers.
//!
//! A stage is one thread running one role. It talks to its neighbours only
//! through the buffers it was built with and stops cooperatively when the
//! shared [`ShutdownFlag`] is set.
//!
//! - [`ClientStage`] - forward hop to the proxies, return hop and finalize
//! - [`RelayStage`] - single hop, used for both proxies and servers

mod client;
mod relay;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::buffer::{Delivery, Inbound, Outbound};
use crate::operation::{Operation, StageMarker};
use crate::results::ResultsError;
use crate::sync::ShutdownFlag;
use crate::trace::{debug, trace};

pub use client::ClientStage;
pub use relay::RelayStage;

/// Worker roles spawned by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Proxy,
    Server,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::Client, Self::Proxy, Self::Server];

    /// Marker a stage of this role leaves on the operations it processes.
    #[must_use]
    pub const fn marker(self) -> StageMarker {
        match self {
            Self::Client => StageMarker::Client,
            Self::Proxy => StageMarker::Proxy,
            Self::Server => StageMarker::Server,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Proxy => "proxy",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a stage loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    #[default]
    Running,
    /// Shutdown observed; no new forwards, an operation already read is still
    /// finalized.
    Draining,
    Terminated,
}

/// Operations one stage instance processed and handed downstream. An
/// operation discarded because shutdown interrupted its forward is not
/// counted.
///
/// Written only by the owning stage; clones let the controller read progress
/// while the stage runs.
#[derive(Debug, Clone, Default)]
pub struct StageCounter(Arc<AtomicU64>);

impl StageCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fatal stage failures. Shutdown is not an error.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A finalized operation could not be stored.
    #[error("failed to record operation: {0}")]
    Results(#[from] ResultsError),
    /// The stage thread panicked.
    #[error("stage thread panicked: {0}")]
    Panicked(String),
}

/// A worker loop that can be run on its own thread.
pub trait Stage: Send {
    fn role(&self) -> Role;

    /// Instance number within the role.
    fn index(&self) -> usize;

    fn state(&self) -> StageState;

    /// Runs until shutdown and returns the number of operations processed.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] on a fatal precondition violation; the stage
    /// stops at once.
    fn run(&mut self) -> Result<u64, StageError>;
}

/// Result of trying to read one operation for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Received {
    /// A valid operation was read while the flag was clear.
    Op(Operation),
    /// A placeholder or empty slot; nothing to do.
    Skipped,
    /// Shutdown was seen before or after the wait.
    Shutdown,
}

/// Reads one operation from `inbound`, checking `shutdown` before the wait
/// and again after waking.
pub(crate) fn receive<I>(inbound: &I, shutdown: &ShutdownFlag) -> Received
where
    I: Inbound<Operation> + ?Sized,
{
    if shutdown.is_requested() {
        return Received::Shutdown;
    }
    match inbound.receive(shutdown) {
        Delivery::Item(op) if op.is_valid() => Received::Op(op),
        Delivery::Item(_) | Delivery::Vacant => {
            trace!("placeholder skipped");
            Received::Skipped
        }
        Delivery::Interrupted => Received::Shutdown,
    }
}

/// Writes `op` downstream. Returns `false` if shutdown interrupted the write,
/// in which case the operation is discarded.
pub(crate) fn forward<O>(outbound: &O, op: Operation, shutdown: &ShutdownFlag) -> bool
where
    O: Outbound<Operation> + ?Sized,
{
    if shutdown.is_requested() {
        debug!(id = %op.id(), "shutdown before forward, operation discarded");
        return false;
    }
    match outbound.send(op, shutdown) {
        Ok(()) => true,
        Err(_dropped) => {
            debug!(id = %_dropped.0.id(), "shutdown during forward, operation discarded");
            false
        }
    }
}
