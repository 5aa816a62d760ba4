//! Task and registration errors.

use thiserror::Error;

/// Errors returned synchronously by [`crate::TaskManager::register`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("a task named `{0}` is already registered")]
    DuplicateName(String),

    #[error("tasks cannot be registered while the manager is running")]
    AlreadyRunning,

    #[error("task name must not be empty")]
    EmptyName,

    #[error("task `{0}` has a zero interval")]
    ZeroInterval(String),
}

/// Error returned from one task cycle.
///
/// Cycle errors are logged and counted by the manager. They never stop the task's
/// loop or affect other tasks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Infrastructure was unavailable; the next tick retries.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The cycle could not run for a non-transient reason.
    #[error("cycle failed: {0}")]
    Failed(String),
}

impl TaskError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
