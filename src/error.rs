//! Error type shared by the task layer.
//!
//! [`TaskError`] is the rejection reason carried by a settled task. It is
//! `Clone` because a single settlement fans out to every derived task in the
//! chain, and `PartialEq` so tests and callers can match on exact reasons.
//!
//! Helper methods (`as_label`, `as_message`) provide short stable strings for
//! logging/metrics.

use std::time::Duration;

use thiserror::Error;

/// # Rejection reason of a task.
///
/// Stored once at settlement time and handed (by clone) to every consumer of
/// the task: `catch` handlers, awaiting callers, and derived tasks that pass
/// the rejection through.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task execution failed with an application-level reason.
    #[error("task failed: {reason}")]
    Failed {
        /// Human-readable failure message.
        reason: String,
    },

    /// Task exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Task body panicked; the panic was caught at the task boundary.
    #[error("task panicked: {reason}")]
    Panicked {
        /// Panic payload rendered as a string (best effort).
        reason: String,
    },

    /// Task was canceled before it could settle.
    #[error("task canceled")]
    Canceled,
}

impl TaskError {
    /// Creates a [`TaskError::Failed`] from any displayable reason.
    ///
    /// # Example
    /// ```
    /// use taskweave::TaskError;
    ///
    /// let err = TaskError::failed("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn failed(reason: impl Into<String>) -> Self {
        TaskError::Failed { reason: reason.into() }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed { .. } => "task_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Failed { reason } => format!("error: {reason}"),
            TaskError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            TaskError::Panicked { reason } => format!("panic: {reason}"),
            TaskError::Canceled => "canceled".to_string(),
        }
    }

    /// True when the rejection stems from cancellation rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}
