//! Implementation of the thread pool itself.

use std::{
    fmt,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use once_cell::sync::Lazy;

use crate::{
    error::SubmitError,
    queue::{PushError, Queue},
    task::{Closure, Job},
    worker::{self, Listener, Worker},
    Handle,
    Task,
};

#[cfg(target_has_atomic = "64")]
type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
type AtomicCounter = std::sync::atomic::AtomicU32;

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Default maximum number of pending tasks.
const DEFAULT_QUEUE_LIMIT: usize = 512;

/// How a thread pool manages its worker threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// A fixed number of worker threads, all spawned when the pool starts.
    Fixed,

    /// Start with the configured number of threads, spawn more when
    /// submitted work finds no idle worker, and retire the extras once they
    /// have been idle for the keep-alive duration.
    Cached,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Fixed
    }
}

/// A builder for constructing a customized [`ThreadPool`].
///
/// All configuration is fixed once the pool is started with
/// [`build`](Builder::build).
///
/// # Examples
///
/// ```
/// use workpool::{Mode, ThreadPool};
///
/// let custom_pool = ThreadPool::builder()
///     .name("my-pool")
///     .mode(Mode::Cached)
///     .size(2)
///     .max_size(8)
///     .queue_limit(64)
///     .build();
/// ```
#[derive(Debug)]
pub struct Builder {
    name: Option<String>,
    mode: Mode,
    size: Option<usize>,
    max_size: Option<usize>,
    stack_size: Option<usize>,
    queue_limit: usize,
    submit_timeout: Duration,
    keep_alive: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            name: None,
            mode: Mode::default(),
            size: None,
            max_size: None,
            stack_size: None,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            submit_timeout: Duration::from_secs(1),
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl Builder {
    /// Set a custom thread name for threads spawned by this thread pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("thread pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set how the pool manages its threads. Defaults to [`Mode::Fixed`].
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of worker threads spawned when the pool starts.
    ///
    /// In [`Mode::Cached`] this is also the number of threads the pool shrinks
    /// back to when idle.
    ///
    /// If not set, one thread per CPU core is used.
    ///
    /// # Panics
    ///
    /// Panics if the size is 0.
    pub fn size(mut self, size: usize) -> Self {
        if size == 0 {
            panic!("thread pool size must be non-zero");
        }

        self.size = Some(size);
        self
    }

    /// Set the maximum number of threads a [`Mode::Cached`] pool may grow to.
    ///
    /// Ignored in [`Mode::Fixed`]. If not set, the maximum is twice the number
    /// of CPU cores, or the initial size if that is larger.
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = Some(size);
        self
    }

    /// Set the size of the stack (in bytes) for threads in this thread pool.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// enforces a larger minimum stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set the maximum number of pending tasks held in the queue.
    ///
    /// Once the queue is full, submitting blocks for up to the
    /// [submit timeout](Builder::submit_timeout) and is then rejected.
    ///
    /// The default limit is 512.
    ///
    /// # Panics
    ///
    /// Panics if the limit is 0.
    pub fn queue_limit(mut self, limit: usize) -> Self {
        if limit == 0 {
            panic!("thread pool queue limit must be non-zero");
        }

        self.queue_limit = limit;
        self
    }

    /// Set how long [`ThreadPool::submit`] waits for room in a full queue
    /// before rejecting a task.
    ///
    /// The default is one second.
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    /// Set a duration for how long to keep idle worker threads alive.
    ///
    /// Only applies in [`Mode::Cached`]. If the pool has more than its initial
    /// number of threads and threads remain idle for more than this duration,
    /// they will be terminated until the initial thread count is reached.
    ///
    /// A worker that is not allowed to retire because the pool is at its
    /// initial size waits for the next task without a timeout.
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Start a thread pool according to the configuration set with this
    /// builder.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread could not be spawned, or if the configured
    /// maximum size is smaller than the initial size.
    pub fn build(self) -> ThreadPool {
        match self.try_build() {
            Ok(pool) => pool,
            Err(e) => panic!("failed to spawn thread pool worker: {}", e),
        }
    }

    /// Start a thread pool according to the configuration set with this
    /// builder, returning an error if a worker thread could not be spawned.
    ///
    /// # Panics
    ///
    /// Panics if the configured maximum size is smaller than the initial size.
    pub fn try_build(self) -> io::Result<ThreadPool> {
        let min_threads = self.size.unwrap_or(*CORE_COUNT);

        let max_threads = match self.mode {
            Mode::Fixed => min_threads,
            Mode::Cached => self
                .max_size
                .unwrap_or_else(|| min_threads.max(*CORE_COUNT * 2)),
        };

        if max_threads < min_threads {
            panic!("thread pool maximum size cannot be smaller than its initial size");
        }

        let shared = Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queue: Arc::new(Queue::new(self.queue_limit)),
            mode: self.mode,
            min_threads,
            max_threads,
            keep_alive: self.keep_alive,
            thread_count: Default::default(),
            completed_tasks_count: Default::default(),
            panicked_tasks_count: Default::default(),
            shutdown_cvar: Condvar::new(),
        };

        let pool = ThreadPool {
            thread_name: self.name,
            stack_size: self.stack_size,
            submit_timeout: self.submit_timeout,
            joined: false,
            shared: Arc::new(shared),
        };

        // If spawning fails part way, dropping the pool stops the workers that
        // did start.
        for _ in 0..min_threads {
            pool.spawn_thread()?;
        }

        log::debug!(
            "started {:?} thread pool with {} threads, queue limit {}",
            pool.shared.mode,
            min_threads,
            pool.shared.queue.capacity()
        );

        Ok(pool)
    }
}

/// A thread pool executing submitted tasks on a group of worker threads.
///
/// Tasks are held in a bounded FIFO queue until a worker is free to run them,
/// so tasks start in the order they were submitted, although they may finish
/// in any order. When the queue is full, submissions wait for a while and are
/// then rejected; see [`submit`](ThreadPool::submit).
///
/// # Shutdown
///
/// Dropping the thread pool stops it from accepting new tasks, lets the
/// workers finish every task already queued, and blocks until all worker
/// threads have exited. Use [`join_timeout`](ThreadPool::join_timeout) to put
/// a bound on that wait.
///
/// When the pool is dropped or joined from one of its own worker threads, for
/// example by a task holding the last `Arc<ThreadPool>`, it is shut down but
/// not waited for, since that worker cannot wait for itself.
///
/// # Monitoring
///
/// Each pool instance provides methods for gathering various statistics on the
/// pool's usage, such as number of current number of threads, tasks completed
/// over time, and queued tasks. While these methods provide the most up-to-date
/// numbers upon invocation, they should not be used for controlling program
/// behavior since they can become immediately outdated due to the live nature
/// of the pool.
pub struct ThreadPool {
    thread_name: Option<String>,
    stack_size: Option<usize>,
    submit_timeout: Duration,
    joined: bool,
    shared: Arc<Shared>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Start a new thread pool with the default configuration.
    ///
    /// If you'd like to customize the thread pool's behavior then use
    /// [`ThreadPool::builder`].
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start a fixed-size thread pool with the given number of threads and
    /// otherwise default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is 0 or a thread could not be spawned.
    #[inline]
    pub fn start(threads: usize) -> Self {
        Self::builder().size(threads).build()
    }

    /// Get a builder for creating a customized thread pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the mode this pool was configured with.
    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    /// Get the maximum number of tasks the queue can hold.
    pub fn queue_limit(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Get the number of threads currently running in the thread pool.
    pub fn threads(&self) -> usize {
        *self.shared.thread_count()
    }

    /// Get the number of tasks queued for execution, but not yet started.
    ///
    /// This number will always be less than or equal to the configured
    /// [`queue_limit`](Builder::queue_limit).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{thread::sleep, time::Duration};
    ///
    /// // Create a pool with just one thread.
    /// let pool = workpool::ThreadPool::start(1);
    ///
    /// // Start a slow task.
    /// let slow = pool.execute(|| sleep(Duration::from_millis(100)));
    ///
    /// // Wait a little for the task to start.
    /// sleep(Duration::from_millis(20));
    ///
    /// // Enqueue some more tasks.
    /// let handles: Vec<_> = (0..4).map(|i| pool.execute(move || i)).collect();
    ///
    /// // They wait behind the slow task on the only thread.
    /// assert_eq!(pool.queued_tasks(), 4);
    /// # slow.get();
    /// ```
    #[inline]
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get the number of tasks currently running.
    #[inline]
    pub fn running_tasks(&self) -> usize {
        self.shared.queue.running()
    }

    /// Get the number of tasks completed (successfully or otherwise) by this
    /// pool since it was created.
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = workpool::ThreadPool::start(1);
    /// assert_eq!(pool.completed_tasks(), 0);
    ///
    /// pool.execute(|| 2 + 2).get();
    /// assert_eq!(pool.completed_tasks(), 1);
    /// ```
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks_count.load(Ordering::Relaxed).into()
    }

    /// Get the number of tasks that have panicked since the pool was created.
    #[inline]
    #[allow(clippy::useless_conversion)]
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks_count.load(Ordering::Relaxed).into()
    }

    /// Submit a task to be executed by the thread pool.
    ///
    /// If the queue is full, this blocks for up to the configured
    /// [submit timeout](Builder::submit_timeout) waiting for room. If there
    /// still is none, or the pool has been shut down, the task is dropped
    /// without running and an invalid [`Handle`] is returned.
    pub fn submit<T: Task>(&self, task: T) -> Handle {
        self.submit_timeout(task, self.submit_timeout)
    }

    /// Like [`submit`](ThreadPool::submit), but waiting at most `timeout` for
    /// room in the queue.
    pub fn submit_timeout<T: Task>(&self, task: T, timeout: Duration) -> Handle {
        let (job, handle) = Job::new(Box::new(task));

        if self.shared.mode == Mode::Cached {
            self.grow();
        }

        match self.shared.queue.push(job, timeout) {
            Ok(queued) => {
                log::trace!("task enqueued, {} pending", queued);
                handle
            }
            Err(PushError::Full(_)) => {
                log::warn!("task queue is full, submission rejected");
                Handle::rejected(SubmitError::Full)
            }
            Err(PushError::Closed(_)) => {
                log::trace!("thread pool is shut down, submission rejected");
                Handle::rejected(SubmitError::ShutDown)
            }
        }
    }

    /// Submit a task without waiting if the queue is full.
    pub fn try_submit<T: Task>(&self, task: T) -> Handle {
        self.submit_timeout(task, Duration::ZERO)
    }

    /// Submit a closure to be executed by the thread pool.
    ///
    /// Behaves like [`submit`](ThreadPool::submit); the closure's return value
    /// becomes the handle's [`Value`](crate::Value).
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = workpool::ThreadPool::start(2);
    /// let handle = pool.execute(|| {
    ///     2 + 2 // some expensive computation
    /// });
    ///
    /// // do something in the meantime
    ///
    /// // now wait for the result
    /// let sum = handle.get().into_inner::<i32>().unwrap();
    /// assert_eq!(sum, 4);
    /// ```
    pub fn execute<T, F>(&self, closure: F) -> Handle
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(Closure::new(closure))
    }

    /// Stop accepting new tasks.
    ///
    /// Tasks already queued are still run, and workers exit once the queue is
    /// empty. This does not block; use [`join`](ThreadPool::join) to wait for
    /// the workers.
    pub fn shutdown(&self) {
        if !self.shared.queue.is_closed() {
            log::debug!("shutting down thread pool");
            self.shared.queue.close();
        }
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped.
    pub fn join(mut self) {
        self.join_internal(None);
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped, or until the given timeout passes.
    ///
    /// Returns `true` if the thread pool shut down fully before the timeout.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        self.join_deadline(Instant::now() + timeout)
    }

    /// Shut down this thread pool and block until all queued tasks have
    /// completed and threads have stopped, or the given deadline passes.
    ///
    /// Returns `true` if the thread pool shut down fully before the deadline.
    pub fn join_deadline(mut self, deadline: Instant) -> bool {
        self.join_internal(Some(deadline))
    }

    fn join_internal(&mut self, deadline: Option<Instant>) -> bool {
        self.joined = true;
        self.shutdown();

        // A worker cannot wait for itself to exit. It finishes its current
        // task and then drains the queue along with the other workers.
        if worker::is_worker_of(self.shared.id) {
            log::debug!("thread pool joined from one of its own workers, not waiting");
            return false;
        }

        let mut thread_count = self.shared.thread_count();

        while *thread_count > 0 {
            // If a deadline is set, figure out how much time is remaining and
            // wait for that amount.
            if let Some(deadline) = deadline {
                if let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
                    thread_count = self
                        .shared
                        .shutdown_cvar
                        .wait_timeout(thread_count, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                } else {
                    return false;
                }
            }
            // If a deadline is not set, wait forever.
            else {
                thread_count = self
                    .shared
                    .shutdown_cvar
                    .wait(thread_count)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        true
    }

    /// Spawn another worker if the pool is busy and below its maximum size.
    fn grow(&self) {
        let (queued, running) = self.shared.queue.load();
        let idle = self.threads().saturating_sub(running);

        if queued >= idle {
            if let Err(e) = self.spawn_thread() {
                log::warn!("failed to spawn additional worker: {}", e);
            }
        }
    }

    /// Spawn an additional thread into the thread pool, if possible.
    ///
    /// Returns `false` if the pool is already at its maximum size.
    fn spawn_thread(&self) -> io::Result<bool> {
        struct WorkerListener {
            shared: Arc<Shared>,
            retired: bool,
        }

        impl Listener for WorkerListener {
            fn on_task_completed(&mut self, panicked: bool) {
                self.shared
                    .completed_tasks_count
                    .fetch_add(1, Ordering::Relaxed);

                if panicked {
                    self.shared
                        .panicked_tasks_count
                        .fetch_add(1, Ordering::Relaxed);
                }
            }

            fn on_idle(&mut self) -> bool {
                // Deciding and decrementing under one lock keeps concurrent
                // idle workers from retiring below the minimum.
                let mut count = self.shared.thread_count();

                if *count > self.shared.min_threads {
                    *count -= 1;
                    self.retired = true;
                    self.shared.shutdown_cvar.notify_all();
                    true
                } else {
                    false
                }
            }
        }

        impl Drop for WorkerListener {
            fn drop(&mut self) {
                if !self.retired {
                    let mut count = self.shared.thread_count();
                    *count = count.saturating_sub(1);
                    self.shared.shutdown_cvar.notify_all();
                }
            }
        }

        // Lock the thread count to prevent race conditions when determining
        // whether new threads can be created.
        let mut thread_count = self.shared.thread_count();

        // We've reached the configured limit for threads, do nothing.
        if *thread_count >= self.shared.max_threads {
            return Ok(false);
        }

        // Configure the thread based on the thread pool configuration.
        let mut builder = thread::Builder::new();

        if let Some(name) = self.thread_name.as_ref() {
            builder = builder.name(name.clone());
        }

        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        let idle_timeout = match self.shared.mode {
            Mode::Fixed => None,
            Mode::Cached => Some(self.shared.keep_alive),
        };

        *thread_count += 1;

        let worker = Worker::new(
            self.shared.id,
            self.shared.queue.clone(),
            idle_timeout,
            WorkerListener {
                shared: self.shared.clone(),
                retired: false,
            },
        );

        // We can now safely unlock the thread count since the worker struct
        // will decrement the count again if it is dropped, including when the
        // spawn below fails.
        drop(thread_count);

        builder.spawn(move || worker.run())?;

        log::debug!("spawned worker thread");

        Ok(true)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.joined {
            self.join_internal(None);
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("mode", &self.mode())
            .field("threads", &self.threads())
            .field("queued_tasks", &self.queued_tasks())
            .field("running_tasks", &self.running_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// Thread pool state shared by the owner and the worker threads.
struct Shared {
    id: usize,
    queue: Arc<Queue>,
    mode: Mode,
    min_threads: usize,
    max_threads: usize,
    keep_alive: Duration,
    thread_count: Mutex<usize>,
    completed_tasks_count: AtomicCounter,
    panicked_tasks_count: AtomicCounter,
    shutdown_cvar: Condvar,
}

impl Shared {
    fn thread_count(&self) -> MutexGuard<'_, usize> {
        self.thread_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
