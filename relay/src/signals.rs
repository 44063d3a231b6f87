//! Interrupt handling.
//!
//! Only the controller reacts to SIGINT/SIGTERM. Stage threads block SIGINT
//! so an interactive interrupt is never delivered to them, and the
//! controller's handler does nothing but set a flag that the controller polls
//! to start an orderly shutdown.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether SIGINT or SIGTERM arrived since the handler was installed.
#[must_use]
pub fn interrupt_requested() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Clears a recorded interrupt.
pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::Relaxed);
}

#[cfg(unix)]
extern "C" fn on_interrupt(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Installs the controller's SIGINT/SIGTERM handler.
///
/// # Errors
///
/// Returns the OS error if a handler cannot be installed.
#[cfg(unix)]
pub fn install_interrupt_handler() -> io::Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: `on_interrupt` is an `extern "C"` fn with a stable address and
        // performs a single atomic store, which is async-signal-safe.
        let previous = unsafe { libc::signal(sig, on_interrupt as *const () as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() -> io::Result<()> {
    Ok(())
}

/// Blocks SIGINT for the calling thread. Called first thing on every stage
/// thread.
///
/// # Errors
///
/// Returns the OS error if the signal mask cannot be changed.
#[cfg(unix)]
pub fn ignore_interrupts() -> io::Result<()> {
    let mut set = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: `sigemptyset` initializes the set before it is read, and the
    // pointers passed to `pthread_sigmask` are valid for the call.
    let rc = unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGINT);
        libc::pthread_sigmask(libc::SIG_BLOCK, set.as_ptr(), std::ptr::null_mut())
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

#[cfg(not(unix))]
pub fn ignore_interrupts() -> io::Result<()> {
    Ok(())
}
