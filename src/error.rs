//! # Errors
//!
//! Three kinds of failure reach application code:
//!
//! - **Timeouts** are ordinary return values (`bool`, `Option`, a bitmask).
//! - **Advisory failures**, such as giving a [`Signal`](crate::Signal) that
//!   is already given, are also plain `false`.
//! - **Contract violations** (double start, kernel object exhaustion, a
//!   missing producer queue) halt at the point of detection through
//!   [`contract_violation`]. Continuing without a kernel handle is undefined
//!   behaviour in the kernel, so these never propagate silently.
//!
//! [`Error`] is only returned by the `try_` constructors for callers that
//! want to handle resource exhaustion themselves.

use thiserror::Error;

/// Kind of kernel object, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    BinarySemaphore,
    RecursiveMutex,
    Queue,
    EventGroup,
}

/// Errors reported by the fallible constructors and [`Task::try_start`].
///
/// [`Task::try_start`]: crate::task::Task::try_start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The kernel could not allocate the object
    #[error("kernel failed to create {0:?}")]
    KernelObject(ObjectKind),

    /// The kernel could not create the task
    #[error("kernel failed to create task")]
    TaskCreate,

    /// The task already owns a live kernel task
    #[error("task already started")]
    AlreadyStarted,
}

/// Report a contract violation and halt.
///
/// Logged at error level first, since the panic handler on a target usually
/// discards the message.
#[cold]
#[track_caller]
pub fn contract_violation(what: impl core::fmt::Display) -> ! {
    log::error!("contract violation: {}", what);
    panic!("contract violation: {}", what)
}

/// Unwrap a constructor result, treating an error as a contract violation.
#[track_caller]
pub(crate) fn or_violation<T>(result: Result<T, Error>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => contract_violation(err),
    }
}
