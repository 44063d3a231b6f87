//! Cooperative shutdown flag shared by every stage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared termination signal, polled by stages before and after every wait.
///
/// Cloning is cheap; all clones observe the same flag. Setting it never
/// interrupts a stage, it only makes the stage's next check return.
///
/// Both sides are `SeqCst` so a waiter announcing itself on another atomic
/// (see [`Dispatcher`](crate::Dispatcher)) either sees the flag or is seen by
/// the controller.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests termination. Idempotent.
    ///
    /// Returns `true` if this call flipped the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Whether termination has been requested.
    #[inline]
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
