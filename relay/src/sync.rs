//! Synchronization primitives shared by the pipeline stages.
//!
//! - [`Semaphore`] - blocking counting semaphore
//! - [`Handshake`] - free/filled semaphore pair guarding a bounded buffer
//! - [`ShutdownFlag`] - cooperative termination signal

mod handshake;
mod semaphore;
mod shutdown;

use std::time::Duration;

pub use handshake::Handshake;
pub use semaphore::Semaphore;
pub use shutdown::ShutdownFlag;

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// Absolute deadline for this timeout, `None` when infinite.
    #[must_use]
    pub fn deadline(self) -> Option<minstant::Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(minstant::Instant::now() + d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}
