//! Error types for batch dispatch

use std::time::Duration;

use thiserror::Error;

/// Error returned for a batch that did not complete cleanly
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError<E> {
    /// A task reported a failure. When several tasks fail, this is the one
    /// with the lowest submission index.
    #[error("task {index} failed: {error}")]
    Task { index: usize, error: TaskError<E> },

    #[error("batch deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    #[error("batch was cancelled")]
    Cancelled,

    /// A race was started without any task to run
    #[error("no tasks were submitted")]
    Empty,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure of a single task, as observed at the worker boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("task panicked: {message}")]
    Panicked { message: String },
}

/// Errors related to configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid concurrency limit: {value} (must be > 0)")]
    InvalidLimit { value: usize },

    #[error("invalid deadline: {duration:?} (must be > 0)")]
    InvalidDeadline { duration: Duration },
}

/// Errors returned by a [`crate::PressureGauge`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeError {
    #[error("no more capacity")]
    NoCapacity,
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

impl<E> DispatchError<E> {
    /// Check if this error indicates external cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// Check if this error indicates the batch deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::DeadlineExceeded { .. })
    }

    /// Submission index of the failing task, if this is a task error
    pub fn task_index(&self) -> Option<usize> {
        match self {
            DispatchError::Task { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The task's own error value, if a task failed without panicking
    pub fn task_error(&self) -> Option<&E> {
        match self {
            DispatchError::Task {
                error: TaskError::Failed(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

impl<E> TaskError<E> {
    /// Build a panic error from the payload returned by `catch_unwind`
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::Panicked { message }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked { .. })
    }
}

impl ConfigError {
    pub fn invalid_limit(value: usize) -> Self {
        ConfigError::InvalidLimit { value }
    }

    pub fn invalid_deadline(duration: Duration) -> Self {
        ConfigError::InvalidDeadline { duration }
    }
}
