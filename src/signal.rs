use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A counting semaphore used to hand a task result from a worker to the
/// thread waiting on its handle.
///
/// Each task posts its signal exactly once; the paired handle consumes it
/// exactly once.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Increment the count and wake every waiter.
    pub(crate) fn post(&self) {
        *self.lock() += 1;
        self.cvar.notify_all();
    }

    /// Block until the count is positive, then decrement it.
    pub(crate) fn wait(&self) {
        let mut count = self
            .cvar
            .wait_while(self.lock(), |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);

        *count -= 1;
    }

    /// Like [`wait`](Signal::wait), but gives up after `timeout`.
    ///
    /// Returns `true` if the signal was consumed.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let (mut count, _) = self
            .cvar
            .wait_timeout_while(self.lock(), timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);

        // Checking the count rather than the timeout result covers a post that
        // lands right as the timeout expires.
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Consume the signal if it has been posted, without blocking.
    pub(crate) fn try_wait(&self) -> bool {
        let mut count = self.lock();

        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_posted(&self) -> bool {
        *self.lock() > 0
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
