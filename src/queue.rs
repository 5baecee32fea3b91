//! The bounded task queue shared by submitters and workers.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

use crate::task::Job;

/// A FIFO queue of jobs with a fixed capacity.
///
/// A single lock guards the jobs and the closed flag. Both condition
/// variables are always notified with `notify_all`, so every waiter must
/// re-check its own predicate after waking.
pub(crate) struct Queue {
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,

    /// Jobs popped but not yet reported finished with
    /// [`task_done`](Queue::task_done).
    running: AtomicUsize,
}

struct State {
    jobs: VecDeque<Job>,
    closed: bool,
}

/// A job the queue refused to accept, handed back to the caller.
pub(crate) enum PushError {
    Full(Job),
    Closed(Job),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PopError {
    Timeout,
    Closed,
}

impl Queue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
            running: AtomicUsize::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of queued and running jobs as one consistent snapshot.
    ///
    /// A job moves from queued to running inside the queue lock, so it is never
    /// missing from both counts.
    pub(crate) fn load(&self) -> (usize, usize) {
        let state = self.lock();

        (state.jobs.len(), self.running.load(Ordering::SeqCst))
    }

    /// Mark a job returned by [`pop`](Queue::pop) as finished.
    pub(crate) fn task_done(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    /// Append a job, waiting up to `timeout` for a free slot.
    ///
    /// Returns the queue length after insertion.
    pub(crate) fn push(&self, job: Job, timeout: Duration) -> Result<usize, PushError> {
        let capacity = self.capacity;

        let (mut state, _) = self
            .not_full
            .wait_timeout_while(self.lock(), timeout, |state| {
                !state.closed && state.jobs.len() >= capacity
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.closed {
            return Err(PushError::Closed(job));
        }

        if state.jobs.len() >= capacity {
            return Err(PushError::Full(job));
        }

        state.jobs.push_back(job);
        let len = state.jobs.len();
        drop(state);

        self.not_empty.notify_all();

        Ok(len)
    }

    /// Remove the job at the front of the queue, waiting for one to arrive if
    /// necessary.
    ///
    /// Without a timeout this only fails once the queue is closed and every
    /// remaining job has been taken.
    pub(crate) fn pop(&self, timeout: Option<Duration>) -> Result<Job, PopError> {
        let waiting = |state: &mut State| !state.closed && state.jobs.is_empty();

        let mut state = match timeout {
            Some(timeout) => {
                self.not_empty
                    .wait_timeout_while(self.lock(), timeout, waiting)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .not_empty
                .wait_while(self.lock(), waiting)
                .unwrap_or_else(PoisonError::into_inner),
        };

        let job = match state.jobs.pop_front() {
            Some(job) => job,
            None if state.closed => return Err(PopError::Closed),
            None => return Err(PopError::Timeout),
        };

        self.running.fetch_add(1, Ordering::SeqCst);

        let more = !state.jobs.is_empty();
        drop(state);

        if more {
            self.not_empty.notify_all();
        }

        self.not_full.notify_all();

        Ok(job)
    }

    /// Stop accepting new jobs and wake everyone waiting on the queue.
    ///
    /// Jobs already queued can still be popped.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
