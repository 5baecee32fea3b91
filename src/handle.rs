use std::{
    fmt,
    future::Future,
    panic::resume_unwind,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll, Waker},
    thread,
    time::Duration,
};

use crate::{error::SubmitError, signal::Signal, Value};

/// A handle to the result of a task submitted to a
/// [`ThreadPool`](crate::ThreadPool).
///
/// Handles can be waited on synchronously with [`get`](Handle::get), or
/// `.await`ed, since they implement [`Future`].
///
/// A submission that the pool rejected still returns a handle, but an
/// _invalid_ one: [`is_valid`](Handle::is_valid) returns `false`, and waiting
/// on it yields an empty [`Value`] immediately. Check validity before trusting
/// the result.
///
/// Dropping a handle does not cancel its task. The task still runs, and its
/// result is discarded.
pub struct Handle {
    state: State,
}

enum State {
    Pending(Arc<Slot>),
    Rejected(SubmitError),
    Consumed,
}

impl Handle {
    pub(crate) fn new() -> (Self, Weak<Slot>) {
        let slot = Arc::new(Slot {
            signal: Signal::new(),
            result: Mutex::new(None),
            waker: Mutex::new(None),
        });
        let weak = Arc::downgrade(&slot);

        (
            Self {
                state: State::Pending(slot),
            },
            weak,
        )
    }

    pub(crate) fn rejected(error: SubmitError) -> Self {
        Self {
            state: State::Rejected(error),
        }
    }

    /// Returns `true` if the task was accepted by the pool.
    pub fn is_valid(&self) -> bool {
        !matches!(self.state, State::Rejected(_))
    }

    /// If the pool rejected the task, the reason why.
    pub fn rejection(&self) -> Option<SubmitError> {
        match self.state {
            State::Rejected(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the result is available without blocking.
    ///
    /// Always `true` for rejected submissions.
    pub fn is_done(&self) -> bool {
        match &self.state {
            State::Pending(slot) => slot.signal.is_posted(),
            _ => true,
        }
    }

    /// Block the current thread until the task completes, and return its
    /// result.
    ///
    /// Returns an empty [`Value`] right away if the submission was rejected.
    ///
    /// # Panics
    ///
    /// If the task panicked, the panic will propagate to this call.
    pub fn get(self) -> Value {
        match self.state {
            State::Pending(slot) => {
                slot.signal.wait();
                slot.take()
            }
            _ => Value::empty(),
        }
    }

    /// Block the current thread until the task completes or a timeout is
    /// reached.
    ///
    /// On timeout the handle is given back so that it can be waited on again.
    ///
    /// # Panics
    ///
    /// If the task panicked, the panic will propagate to this call.
    pub fn get_timeout(self, timeout: Duration) -> Result<Value, Self> {
        let slot = match &self.state {
            State::Pending(slot) => slot.clone(),
            _ => return Ok(Value::empty()),
        };

        if slot.signal.wait_timeout(timeout) {
            Ok(slot.take())
        } else {
            Err(self)
        }
    }
}

impl Future for Handle {
    type Output = Value;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let slot = match &self.state {
            State::Pending(slot) => slot.clone(),
            _ => return Poll::Ready(Value::empty()),
        };

        // Register before checking, so that a completion racing with this poll
        // either is seen by the check or finds the waker.
        slot.register(cx.waker());

        if slot.signal.try_wait() {
            self.state = State::Consumed;
            Poll::Ready(slot.take())
        } else {
            Poll::Pending
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("valid", &self.is_valid())
            .field("done", &self.is_done())
            .finish()
    }
}

/// State shared between a handle and the worker completing it.
pub(crate) struct Slot {
    signal: Signal,
    result: Mutex<Option<thread::Result<Value>>>,
    waker: Mutex<Option<Waker>>,
}

impl Slot {
    /// Store the result and wake whoever is waiting for it.
    pub(crate) fn complete(&self, result: thread::Result<Value>) {
        *lock(&self.result) = Some(result);
        self.signal.post();

        let waker = lock(&self.waker).take();

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn register(&self, waker: &Waker) {
        let mut slot = lock(&self.waker);

        match slot.as_ref() {
            Some(existing) if existing.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    fn take(&self) -> Value {
        let result = lock(&self.result).take();

        match result {
            Some(Ok(value)) => value,
            Some(Err(e)) => resume_unwind(e),
            None => {
                debug_assert!(false, "signal posted without a stored result");
                Value::empty()
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
