//! Error taxonomy shared by the stores, the scheduler and the task service.

use crate::task::TaskId;

/// Errors surfaced by task and settings operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
  /// Input was rejected before anything was written.
  #[error("invalid input: {0}")]
  Validation(String),

  /// No task with this id exists in the store.
  #[error("task not found: {0}")]
  NotFound(TaskId),

  /// The alarm service refused an exact wake-up.
  #[error("permission denied: {0}")]
  PermissionDenied(String),

  /// Reading or writing durable state failed.
  #[error("storage failure: {0:#}")]
  Storage(#[source] anyhow::Error)
}

impl TaskError {
  pub fn validation(
    reason: impl Into<String>
  ) -> Self {
    Self::Validation(reason.into())
  }
}

impl From<anyhow::Error> for TaskError {
  fn from(err: anyhow::Error) -> Self {
    Self::Storage(err)
  }
}

pub type TaskResult<T> =
  Result<T, TaskError>;
