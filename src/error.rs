use std::{error::Error, fmt};

/// The reason a submission was rejected by a thread pool.
///
/// A rejected submission still produces a [`Handle`](crate::Handle), but an
/// invalid one; this error can be retrieved from it with
/// [`Handle::rejection`](crate::Handle::rejection).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The task queue stayed full for the whole submit timeout.
    Full,

    /// The pool has been shut down and no longer accepts work.
    ShutDown,
}

impl Error for SubmitError {}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("task queue is full"),
            Self::ShutDown => f.write_str("thread pool is shut down"),
        }
    }
}

/// An error returned when a [`Value`](crate::Value) is extracted as a type
/// other than the one it holds.
#[derive(Clone, PartialEq, Eq)]
pub struct TypeMismatchError {
    expected: &'static str,
    found: Option<&'static str>,
}

impl TypeMismatchError {
    pub(crate) fn new(expected: &'static str, found: Option<&'static str>) -> Self {
        Self { expected, found }
    }

    /// Name of the type that was requested.
    pub fn expected(&self) -> &'static str {
        self.expected
    }

    /// Name of the type actually stored, or `None` if the value was empty.
    pub fn found(&self) -> Option<&'static str> {
        self.found
    }
}

impl Error for TypeMismatchError {}

impl fmt::Debug for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMismatchError")
            .field("expected", &self.expected)
            .field("found", &self.found)
            .finish()
    }
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.found {
            Some(found) => write!(
                f,
                "type mismatch: expected `{}`, found `{}`",
                self.expected, found
            ),
            None => write!(
                f,
                "type mismatch: expected `{}`, found empty value",
                self.expected
            ),
        }
    }
}

/// An error returned when attempting to configure the common thread pool after
/// it has already been initialized.
pub struct CommonAlreadyInitializedError(());

impl CommonAlreadyInitializedError {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

impl Error for CommonAlreadyInitializedError {}

impl fmt::Debug for CommonAlreadyInitializedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommonAlreadyInitializedError")
    }
}

impl fmt::Display for CommonAlreadyInitializedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("common thread pool already initialized")
    }
}
