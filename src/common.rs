use once_cell::sync::OnceCell;

use crate::{Builder, CommonAlreadyInitializedError, ThreadPool};

static COMMON: OnceCell<ThreadPool> = OnceCell::new();

/// Get the process-wide pool, starting it with the default configuration on
/// first use.
///
/// The common pool is a fixed-size pool with a 512-task queue and is never
/// dropped, so it is not joined at exit and tasks still queued when the
/// process ends do not run. Code that must see every handle complete should
/// own a pool instead.
///
/// # Examples
///
/// ```
/// let handle = workpool::common().execute(|| 2 + 2);
///
/// assert!(handle.is_valid());
/// assert_eq!(handle.get().into_inner::<i32>().unwrap(), 4);
/// ```
pub fn common() -> &'static ThreadPool {
    COMMON.get_or_init(|| common_builder().build())
}

/// Choose the configuration of the process-wide pool before anything uses it.
///
/// The closure receives a builder whose threads are named `common-pool`. Once
/// [`common`] has been called, the pool exists and this returns an error
/// without calling the closure.
///
/// Libraries sharing the common pool should leave its configuration to the
/// program that links them.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// workpool::configure_common(|builder| builder
///     .size(3)
///     .queue_limit(1024)
///     .submit_timeout(Duration::from_millis(100)))
///     .unwrap();
///
/// assert_eq!(workpool::common().threads(), 3);
/// assert_eq!(workpool::common().queue_limit(), 1024);
///
/// // Configuring again is refused.
/// assert!(workpool::configure_common(|builder| builder.size(1)).is_err());
/// ```
pub fn configure_common<F>(f: F) -> Result<(), CommonAlreadyInitializedError>
where
    F: FnOnce(Builder) -> Builder,
{
    let mut configured = false;

    COMMON.get_or_init(|| {
        configured = true;
        f(common_builder()).build()
    });

    if configured {
        Ok(())
    } else {
        Err(CommonAlreadyInitializedError::new())
    }
}

fn common_builder() -> Builder {
    Builder::default().name("common-pool")
}
