use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Weak,
    thread,
};

use crate::{handle::Slot, Handle, Value};

/// A unit of work that can be submitted to a [`ThreadPool`](crate::ThreadPool).
///
/// Implement this for your own types to submit them with
/// [`ThreadPool::submit`](crate::ThreadPool::submit). For one-off closures,
/// [`ThreadPool::execute`](crate::ThreadPool::execute) is usually more
/// convenient.
///
/// # Examples
///
/// ```
/// use workpool::{Task, ThreadPool, Value};
///
/// struct Sum {
///     begin: u64,
///     end: u64,
/// }
///
/// impl Task for Sum {
///     fn run(&mut self) -> Value {
///         Value::new((self.begin..=self.end).sum::<u64>())
///     }
/// }
///
/// let pool = ThreadPool::start(2);
/// let handle = pool.submit(Sum { begin: 1, end: 100 });
///
/// assert_eq!(handle.get().into_inner::<u64>().unwrap(), 5050);
/// ```
pub trait Task: Send + 'static {
    /// Perform the work and return its result.
    ///
    /// Called exactly once, on a worker thread.
    fn run(&mut self) -> Value;
}

impl<T: Task + ?Sized> Task for Box<T> {
    fn run(&mut self) -> Value {
        (**self).run()
    }
}

/// Adapts a closure into a [`Task`].
pub(crate) struct Closure<F>(Option<F>);

impl<F> Closure<F> {
    pub(crate) fn new(closure: F) -> Self {
        Self(Some(closure))
    }
}

impl<F, T> Task for Closure<F>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    fn run(&mut self) -> Value {
        match self.0.take() {
            Some(closure) => Value::new(closure()),
            None => Value::empty(),
        }
    }
}

/// A task waiting in the queue, paired with the handle its result goes to.
pub(crate) struct Job {
    task: Box<dyn Task>,
    completer: Completer,
}

impl Job {
    /// Create a job and the handle that will receive its result.
    pub(crate) fn new(task: Box<dyn Task>) -> (Self, Handle) {
        let (handle, slot) = Handle::new();

        let job = Job {
            task,
            completer: Completer { slot },
        };

        (job, handle)
    }

    /// Run the task to completion.
    ///
    /// The result is not handed to the submitter until
    /// [`Completion::deliver`] is called.
    pub(crate) fn run(self) -> Completion {
        let Job { mut task, completer } = self;

        Completion {
            result: catch_unwind(AssertUnwindSafe(|| task.run())),
            completer,
        }
    }
}

/// The outcome of a job that has run but not yet been delivered.
pub(crate) struct Completion {
    result: thread::Result<Value>,
    completer: Completer,
}

impl Completion {
    pub(crate) fn panicked(&self) -> bool {
        self.result.is_err()
    }

    /// Hand the result over to the paired handle, waking its waiter.
    pub(crate) fn deliver(self) {
        self.completer.complete(self.result);
    }
}

/// The worker-side half of a [`Handle`].
///
/// Holds only a weak reference, since the submitter is free to drop its handle
/// while the job is still queued.
struct Completer {
    slot: Weak<Slot>,
}

impl Completer {
    fn complete(self, result: thread::Result<Value>) {
        match self.slot.upgrade() {
            Some(slot) => slot.complete(result),
            None => log::trace!("handle dropped before task completed, discarding result"),
        }
    }
}

