//! Type-erased task results.

use std::{
    any::{type_name, Any},
    fmt,
};

use crate::error::TypeMismatchError;

/// A container holding a single value of a statically-unknown type.
///
/// Every task submitted to a [`ThreadPool`](crate::ThreadPool) produces a
/// `Value`, which lets tasks with different result types share one queue and
/// one handle type. The stored value can only be recovered as the exact type
/// it was created from.
///
/// # Examples
///
/// ```
/// use workpool::Value;
///
/// let mut value = Value::new(42u64);
///
/// // Asking for the wrong type fails and leaves the value in place.
/// assert!(value.extract::<i32>().is_err());
///
/// // Asking for the right type moves the value out.
/// assert_eq!(value.extract::<u64>().unwrap(), 42);
/// assert!(value.is_empty());
/// ```
#[derive(Default)]
pub struct Value {
    inner: Option<Inner>,
}

struct Inner {
    data: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Value {
    /// Store a value, taking ownership of it.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            inner: Some(Inner {
                data: Box::new(value),
                type_name: type_name::<T>(),
            }),
        }
    }

    /// Create a value holding nothing.
    ///
    /// This is what [`Handle::get`](crate::Handle::get) returns for
    /// submissions that were rejected.
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Returns `true` if this value currently holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.as_ref().map_or(false, |inner| inner.data.is::<T>())
    }

    /// Name of the stored type, if any.
    ///
    /// Intended for diagnostics only; the exact format is not guaranteed.
    pub fn type_name(&self) -> Option<&'static str> {
        self.inner.as_ref().map(|inner| inner.type_name)
    }

    /// Borrow the stored value as a `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref()?.data.downcast_ref()
    }

    /// Move the stored value out as a `T`.
    ///
    /// On success the value is left empty. If this value does not hold a `T`
    /// (including when it is empty) an error is returned and the value is left
    /// untouched.
    pub fn extract<T: Any>(&mut self) -> Result<T, TypeMismatchError> {
        let inner = match self.inner.take() {
            Some(inner) => inner,
            None => return Err(TypeMismatchError::new(type_name::<T>(), None)),
        };

        match inner.data.downcast::<T>() {
            Ok(data) => Ok(*data),
            Err(data) => {
                let found = inner.type_name;
                self.inner = Some(Inner {
                    data,
                    type_name: found,
                });

                Err(TypeMismatchError::new(type_name::<T>(), Some(found)))
            }
        }
    }

    /// Consume this value and return the stored `T`.
    pub fn into_inner<T: Any>(mut self) -> Result<T, TypeMismatchError> {
        self.extract()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "Value({})", name),
            None => f.write_str("Value(<empty>)"),
        }
    }
}
