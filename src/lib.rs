#![doc = include_str!("../README.md")]

mod common;
mod error;
mod handle;
mod pool;
mod queue;
mod signal;
mod task;
mod value;
mod worker;

pub use crate::{
    common::{common, configure_common},
    error::{CommonAlreadyInitializedError, SubmitError, TypeMismatchError},
    handle::Handle,
    pool::{Builder, Mode, ThreadPool},
    task::Task,
    value::Value,
};
