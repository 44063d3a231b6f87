//! Blocking counting semaphore.
//!
//! A permit count guarded by a [`parking_lot::Mutex`] with a [`Condvar`] for
//! waiters. Every `release` happens-before the `acquire` that consumes its
//! permit, so data written before a release is visible after the acquire.

use parking_lot::{Condvar, Mutex};

use super::Timeout;

/// Counting semaphore with blocking and timed acquisition.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Waits for a permit until the timeout elapses.
    ///
    /// Returns `false` if no permit was obtained.
    #[must_use]
    pub fn acquire_timeout(&self, timeout: Timeout) -> bool {
        let Some(deadline) = timeout.deadline() else {
            self.acquire();
            return true;
        };

        let mut permits = self.permits.lock();
        while *permits == 0 {
            let now = minstant::Instant::now();
            if now >= deadline {
                return false;
            }
            // Spurious wakeups and timeouts both fall through to the recheck.
            let _ = self.available.wait_for(&mut permits, deadline.duration_since(now));
        }
        *permits -= 1;
        true
    }

    /// Returns one permit and wakes one waiter.
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Returns `n` permits and wakes up to `n` waiters.
    pub fn release_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += n;
        drop(permits);
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Current number of permits (a snapshot; may change immediately).
    #[must_use]
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_consumes_permits() {
        let sem = Semaphore::new(2);
        sem.acquire();
        assert_eq!(sem.available(), 1);
        sem.acquire();
        assert_eq!(sem.available(), 0);
        assert!(!sem.acquire_timeout(Timeout::Duration(Duration::from_millis(5))));
    }

    #[test]
    fn release_returns_permits() {
        let sem = Semaphore::new(0);
        sem.release();
        sem.release_many(3);
        sem.release_many(0);
        assert_eq!(sem.available(), 4);
    }

    #[test]
    fn acquire_timeout_expires_without_permit() {
        let sem = Semaphore::new(0);
        let start = std::time::Instant::now();
        assert!(!sem.acquire_timeout(Timeout::Duration(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn acquire_timeout_infinite_takes_available_permit() {
        let sem = Semaphore::new(1);
        assert!(sem.acquire_timeout(Timeout::Infinite));
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let sem = Arc::new(Semaphore::new(0));
        let woke = Arc::new(AtomicBool::new(false));

        let handle = {
            let sem = Arc::clone(&sem);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                sem.acquire();
                woke.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::Acquire), "acquire must block with no permits");

        sem.release();
        handle.join().unwrap();
        assert!(woke.load(Ordering::Acquire));
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn release_many_wakes_every_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        sem.release_many(4);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sem.available(), 0);
    }
}
