use std::{cell::Cell, sync::Arc, time::Duration};

use crate::{
    queue::{PopError, Queue},
    task::Job,
};

thread_local! {
    /// Identifier of the pool the current thread is a worker of, if any.
    static CURRENT_POOL: Cell<Option<usize>> = Cell::new(None);
}

/// Returns `true` if the calling thread is a worker of the given pool.
pub(crate) fn is_worker_of(pool_id: usize) -> bool {
    CURRENT_POOL.with(|current| current.get() == Some(pool_id))
}

/// A type which receives notifications from a worker.
pub(crate) trait Listener {
    fn on_task_completed(&mut self, _panicked: bool) {}

    /// Called when the worker has gone a full idle timeout without work.
    ///
    /// Returning `true` retires the worker.
    fn on_idle(&mut self) -> bool {
        false
    }
}

/// A worker thread which belongs to a thread pool and executes tasks.
pub(crate) struct Worker<L: Listener> {
    /// Identifier of the pool this worker belongs to.
    pool_id: usize,

    /// Queue of tasks to run, shared with every other worker in the pool.
    queue: Arc<Queue>,

    /// How long to wait for work before asking the listener whether to exit.
    /// Workers in a fixed-size pool never time out.
    idle_timeout: Option<Duration>,

    /// Receiver of various worker events.
    listener: L,
}

impl<L: Listener> Worker<L> {
    pub(crate) fn new(
        pool_id: usize,
        queue: Arc<Queue>,
        idle_timeout: Option<Duration>,
        listener: L,
    ) -> Self {
        Self {
            pool_id,
            queue,
            idle_timeout,
            listener,
        }
    }

    pub(crate) fn run(mut self) {
        CURRENT_POOL.with(|current| current.set(Some(self.pool_id)));

        let mut timeout = self.idle_timeout;

        // Main worker loop
        loop {
            match self.queue.pop(timeout) {
                Ok(job) => {
                    self.execute(job);
                    timeout = self.idle_timeout;
                }
                Err(PopError::Timeout) => {
                    if self.listener.on_idle() {
                        log::debug!("worker idle past keep-alive, retiring");
                        break;
                    }

                    // Retirement was declined because the pool is at its
                    // minimum size. Wait untimed until the next job arrives.
                    timeout = None;
                }
                Err(PopError::Closed) => {
                    log::trace!("queue closed and drained, worker exiting");
                    break;
                }
            }
        }
    }

    fn execute(&mut self, job: Job) {
        log::trace!("worker dequeued task");

        let completion = job.run();
        self.queue.task_done();

        // Update pool statistics before the submitter can observe the result.
        self.listener.on_task_completed(completion.panicked());
        completion.deliver();
    }
}
