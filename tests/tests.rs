use std::{
    collections::HashSet,
    future::Future,
    panic::catch_unwind,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use workpool::{Handle, Mode, SubmitError, Task, ThreadPool, Value};

fn single_thread() -> ThreadPool {
    ThreadPool::start(1)
}

/// Poll a future to completion on the current thread.
fn block_on<F: Future>(future: F) -> F::Output {
    let current = thread::current();
    let waker = waker_fn::waker_fn(move || current.unpark());
    let mut cx = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => thread::park(),
        }
    }
}

/// Spin until `condition` holds, failing the test after a second.
fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);

    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Occupy a worker until the returned sender is dropped.
fn stall(pool: &ThreadPool) -> (Sender<()>, Handle) {
    let (release, gate): (Sender<()>, Receiver<()>) = bounded(0);
    let handle = pool.execute(move || {
        let _ = gate.recv();
    });

    wait_until(|| pool.running_tasks() == 1);

    (release, handle)
}

fn value<T: 'static>(handle: Handle) -> T {
    handle.get().into_inner().unwrap()
}

struct Sum {
    begin: u64,
    end: u64,
}

impl Task for Sum {
    fn run(&mut self) -> Value {
        Value::new((self.begin..=self.end).sum::<u64>())
    }
}

#[test]
#[should_panic(expected = "thread pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    ThreadPool::builder().name("uh\0oh").build();
}

#[test]
#[should_panic(expected = "thread pool size must be non-zero")]
fn invalid_size_zero_panics() {
    ThreadPool::builder().size(0);
}

#[test]
#[should_panic(expected = "thread pool queue limit must be non-zero")]
fn invalid_queue_limit_zero_panics() {
    ThreadPool::builder().queue_limit(0);
}

#[test]
#[should_panic(expected = "thread pool maximum size cannot be smaller than its initial size")]
fn invalid_max_size_panics() {
    ThreadPool::builder()
        .mode(Mode::Cached)
        .size(4)
        .max_size(2)
        .build();
}

#[test]
fn defaults() {
    let pool = ThreadPool::new();

    assert_eq!(pool.mode(), Mode::Fixed);
    assert_eq!(pool.queue_limit(), 512);
    assert_eq!(pool.threads(), num_cpus::get().max(1));
}

#[test]
fn submit_task() {
    let pool = single_thread();

    let handle = pool.submit(Sum { begin: 1, end: 100 });

    assert!(handle.is_valid());
    assert_eq!(value::<u64>(handle), 5050);
}

#[test]
fn submit_boxed_task() {
    let pool = single_thread();
    let task: Box<dyn Task> = Box::new(Sum { begin: 1, end: 10 });

    assert_eq!(value::<u64>(pool.submit(task)), 55);
}

#[test]
fn execute() {
    let pool = single_thread();

    let result = pool.execute(|| 2 + 2).get();

    assert_eq!(result.into_inner::<i32>().unwrap(), 4);
}

#[test]
fn wrong_result_type_is_an_error() {
    let pool = single_thread();

    let error = pool.execute(|| 7i32).get().into_inner::<u64>().unwrap_err();

    assert_eq!(error.expected(), "u64");
    assert_eq!(error.found(), Some("i32"));
}

#[test]
fn every_submission_within_capacity_completes() {
    let pool = ThreadPool::builder().size(2).queue_limit(8).build();

    let handles: Vec<_> = (0..8u64)
        .map(|i| pool.submit(Sum { begin: 0, end: i }))
        .collect();

    assert!(handles.iter().all(Handle::is_valid));

    let results: Vec<u64> = handles.into_iter().map(value::<u64>).collect();
    assert_eq!(results, vec![0, 1, 3, 6, 10, 15, 21, 28]);
}

#[test]
fn full_queue_rejects_after_timeout() {
    let pool = ThreadPool::builder()
        .size(1)
        .queue_limit(1)
        .submit_timeout(Duration::from_millis(50))
        .build();

    let (release, stalled) = stall(&pool);
    let queued = pool.execute(|| 1);
    assert!(queued.is_valid());
    assert_eq!(pool.queued_tasks(), 1);

    let start = Instant::now();
    let rejected = pool.execute(|| 2);
    assert!(start.elapsed() >= Duration::from_millis(50));

    assert!(!rejected.is_valid());
    assert_eq!(rejected.rejection(), Some(SubmitError::Full));
    assert!(rejected.is_done());

    // Waiting on a rejected handle returns the sentinel without blocking.
    let start = Instant::now();
    assert!(rejected.get().is_empty());
    assert!(start.elapsed() < Duration::from_millis(50));

    assert_eq!(pool.queued_tasks(), 1);

    drop(release);
    stalled.get();
    assert_eq!(value::<i32>(queued), 1);
}

#[test]
fn try_submit_does_not_wait() {
    let pool = ThreadPool::builder().size(1).queue_limit(1).build();

    let (release, _stalled) = stall(&pool);
    assert!(pool.try_submit(Sum { begin: 0, end: 1 }).is_valid());

    let start = Instant::now();
    let rejected = pool.try_submit(Sum { begin: 0, end: 1 });

    assert_eq!(rejected.rejection(), Some(SubmitError::Full));
    assert!(start.elapsed() < Duration::from_millis(500));

    drop(release);
}

#[test]
fn tasks_start_in_submission_order() {
    let pool = single_thread();
    let (started, order) = unbounded();

    let (release, stalled) = stall(&pool);

    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|&name| {
            let started = started.clone();
            pool.execute(move || started.send(name).unwrap())
        })
        .collect();

    drop(release);
    stalled.get();
    handles.into_iter().for_each(|handle| {
        handle.get();
    });

    assert_eq!(order.try_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

#[test]
fn concurrent_submitters_run_every_task_once() {
    const SUBMITTERS: usize = 4;
    const TASKS: usize = 250;

    let pool = Arc::new(ThreadPool::builder().size(4).queue_limit(64).build());
    let runs: Arc<Vec<AtomicUsize>> =
        Arc::new((0..SUBMITTERS * TASKS).map(|_| AtomicUsize::new(0)).collect());

    let submitters: Vec<_> = (0..SUBMITTERS)
        .map(|s| {
            let pool = pool.clone();
            let runs = runs.clone();

            thread::spawn(move || {
                (0..TASKS)
                    .map(|t| {
                        let id = s * TASKS + t;
                        let runs = runs.clone();

                        pool.execute(move || {
                            runs[id].fetch_add(1, Ordering::SeqCst);
                            id
                        })
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();

    for submitter in submitters {
        for handle in submitter.join().unwrap() {
            assert!(handle.is_valid());
            assert!(seen.insert(value::<usize>(handle)));
        }
    }

    assert_eq!(seen.len(), SUBMITTERS * TASKS);
    assert!(runs.iter().all(|count| count.load(Ordering::SeqCst) == 1));
    assert_eq!(pool.completed_tasks(), (SUBMITTERS * TASKS) as u64);
}

#[test]
fn small_queue_end_to_end() {
    let pool = ThreadPool::builder().size(1).queue_limit(2).build();

    let handles: Vec<_> = (0..3u32)
        .map(|i| {
            let handle = pool.execute(move || {
                thread::sleep(Duration::from_millis(20));
                i
            });
            assert!(pool.queued_tasks() <= 2);
            handle
        })
        .collect();

    assert!(handles.iter().all(Handle::is_valid));

    let results: HashSet<u32> = handles.into_iter().map(value::<u32>).collect();
    assert_eq!(results, (0..3).collect());
}

#[test]
fn get_timeout_returns_handle() {
    let pool = single_thread();

    let handle = pool.execute(|| {
        thread::sleep(Duration::from_millis(100));
        "late"
    });

    let handle = handle.get_timeout(Duration::from_millis(10)).unwrap_err();
    assert!(!handle.is_done());

    assert_eq!(value::<&str>(handle), "late");
}

#[test]
fn handle_is_a_future() {
    let pool = single_thread();

    let handle = pool.execute(|| {
        thread::sleep(Duration::from_millis(20));
        2 + 2
    });

    assert_eq!(block_on(handle).into_inner::<i32>().unwrap(), 4);
}

#[test]
fn rejected_handle_future_is_ready() {
    let pool = single_thread();
    pool.shutdown();

    assert!(block_on(pool.execute(|| 1)).is_empty());
}

#[test]
fn dropped_handle_still_runs_task() {
    let pool = single_thread();
    let (tx, rx) = bounded(1);

    drop(pool.execute(move || tx.send(42).unwrap()));

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(42));
}

#[test]
fn name() {
    let pool = ThreadPool::builder().name("foo").size(1).build();

    let name = pool.execute(|| thread::current().name().unwrap().to_owned());

    assert_eq!(value::<String>(name), "foo");
}

#[test]
#[should_panic(expected = "oh no!")]
fn panic_propagates_to_handle() {
    let pool = single_thread();

    pool.execute(|| panic!("oh no!")).get();
}

#[test]
fn panic_count() {
    let pool = single_thread();
    assert_eq!(pool.panicked_tasks(), 0);

    let handle = pool.execute(|| panic!("oh no!"));
    let _ = catch_unwind(move || {
        handle.get();
    });

    assert_eq!(pool.panicked_tasks(), 1);

    // The worker survives the panic.
    assert_eq!(value::<i32>(pool.execute(|| 2 + 2)), 4);
    assert_eq!(pool.threads(), 1);
}

#[test]
fn tasks_completed() {
    let pool = single_thread();
    assert_eq!(pool.completed_tasks(), 0);

    pool.execute(|| 2 + 2).get();
    assert_eq!(pool.completed_tasks(), 1);

    pool.execute(|| 2 + 2).get();
    assert_eq!(pool.completed_tasks(), 2);
}

#[test]
fn fixed_thread_count() {
    let pool = ThreadPool::start(3);

    assert_eq!(pool.threads(), 3);
}

#[test]
fn cached_pool_grows_and_shrinks() {
    let pool = ThreadPool::builder()
        .mode(Mode::Cached)
        .size(1)
        .max_size(4)
        .keep_alive(Duration::from_millis(100))
        .build();
    assert_eq!(pool.threads(), 1, "pool starts at its initial size");

    let handles: Vec<_> = (0..4)
        .map(|_| pool.execute(|| thread::sleep(Duration::from_millis(100))))
        .collect();

    assert!(pool.threads() > 1, "busy pool spawned more threads");
    assert!(pool.threads() <= 4);

    handles.into_iter().for_each(|handle| {
        handle.get();
    });

    wait_until(|| pool.threads() == 1);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(pool.threads(), 1, "pool never shrinks below its initial size");
}

#[test]
fn idle_cached_pool_at_minimum_size_keeps_working() {
    let pool = ThreadPool::builder()
        .mode(Mode::Cached)
        .size(2)
        .max_size(4)
        .keep_alive(Duration::ZERO)
        .build();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.threads(), 2);
    assert_eq!(pool.running_tasks(), 0);

    assert_eq!(value::<i32>(pool.execute(|| 2 + 2)), 4);
    assert_eq!(pool.threads(), 2);
}

#[test]
fn shutdown_rejects_new_tasks() {
    let pool = single_thread();

    pool.shutdown();

    let handle = pool.execute(|| 2 + 2);
    assert_eq!(handle.rejection(), Some(SubmitError::ShutDown));
    assert!(handle.get().is_empty());
}

#[test]
fn join() {
    // Just a dumb test to make sure join doesn't do anything strange.
    ThreadPool::default().join();
}

#[test]
fn join_drains_queued_tasks() {
    let pool = single_thread();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            pool.execute(move || {
                thread::sleep(Duration::from_millis(10));
                i
            })
        })
        .collect();

    pool.join();

    assert!(handles.iter().all(Handle::is_done));

    let results: Vec<i32> = handles.into_iter().map(value::<i32>).collect();
    assert_eq!(results, vec![0, 1, 2, 3, 4]);
}

#[test]
fn dropping_last_reference_from_own_worker() {
    let pool = Arc::new(single_thread());
    let inner = pool.clone();
    let (go, wait) = bounded::<()>(0);
    let (done, finished) = bounded(1);

    let first = pool.execute(move || {
        let _ = wait.recv();
        drop(inner);
        done.send(()).unwrap();
    });
    let second = pool.execute(|| 2 + 2);

    drop(pool);
    go.send(()).unwrap();

    assert_eq!(finished.recv_timeout(Duration::from_secs(2)), Ok(()));
    first.get();

    // The queue was closed by the worker, but work already queued still ran.
    assert_eq!(value::<i32>(second), 4);
}

#[test]
fn join_timeout_expiring() {
    let pool = ThreadPool::builder().size(1).build();
    assert_eq!(pool.threads(), 1);

    // Schedule a slow task on the only thread.
    let _handle = pool.execute(|| thread::sleep(Duration::from_millis(50)));

    // Joining should time out since there's one task still running longer
    // than our join timeout.
    assert!(!pool.join_timeout(Duration::from_millis(10)));
}

#[test]
fn join_timeout_completing() {
    let pool = single_thread();

    pool.execute(|| thread::sleep(Duration::from_millis(10)));

    assert!(pool.join_timeout(Duration::from_secs(1)));
}

#[test]
fn configure_common_after_use_fails() {
    workpool::common().execute(|| ()).get();

    assert!(workpool::configure_common(|builder| builder.size(1)).is_err());
}

#[test]
fn common_pool_uses_default_limit_and_thread_name() {
    let pool = workpool::common();

    assert_eq!(pool.queue_limit(), 512);
    assert_eq!(pool.mode(), Mode::Fixed);

    let name = pool.execute(|| thread::current().name().map(String::from));

    assert_eq!(value::<Option<String>>(name), Some(String::from("common-pool")));
}
