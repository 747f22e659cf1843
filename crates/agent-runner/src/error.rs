//! Error Types

use thiserror::Error;

use crate::task::{StepId, TaskId};

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent runner error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// No task registered under this ID
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// A wave was requested but the task has no pending steps
    #[error("No pending step for task {0}")]
    NoPendingStep(TaskId),

    /// Explicitly requested step is not pending for the task
    #[error("Step {step_id} is not pending for task {task_id}")]
    StepNotFound { task_id: TaskId, step_id: StepId },

    /// A worker call failed; the original error is kept as the source
    #[error("Worker execution failed for task {task_id}: {source}")]
    WorkerExecution {
        task_id: TaskId,
        step_id: Option<StepId>,
        #[source]
        source: Box<AgentError>,
    },

    /// Finalization was requested on a non-terminal output
    #[error("Step {0} is not the last step of its task")]
    StepNotLast(StepId),

    /// A worker produced a step ID that was already seen for the task
    #[error("Duplicate step id: {0}")]
    DuplicateStep(StepId),

    /// The frontier drained without any branch reporting `is_last`
    #[error("Task {0} finished without a terminal output")]
    NoTerminalOutput(TaskId),

    /// Maximum number of steps reached while driving a task
    #[error("Maximum steps ({0}) reached")]
    MaxSteps(usize),

    /// A step did not complete within the allotted time
    #[error("Step timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Wrap an error raised inside a worker call
    pub fn worker(task_id: &TaskId, step_id: Option<&StepId>, source: AgentError) -> Self {
        AgentError::WorkerExecution {
            task_id: task_id.clone(),
            step_id: step_id.cloned(),
            source: Box::new(source),
        }
    }

    /// Check if error is retryable
    ///
    /// The runner never retries on its own; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout(_) => true,
            AgentError::WorkerExecution { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::TaskNotFound(id) => format!("The task '{}' does not exist.", id),
            AgentError::NoPendingStep(_) => "This task has no remaining steps to run.".into(),
            AgentError::WorkerExecution { source, .. } => {
                format!("The agent failed while working on this task: {}", source)
            }
            AgentError::MaxSteps(_) => {
                "The task took too many steps. Please try a simpler request.".into()
            }
            AgentError::Timeout(_) => {
                "The agent took too long to respond. Please try again.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_keeps_source() {
        let task_id = TaskId::new();
        let err = AgentError::worker(&task_id, None, AgentError::Other("boom".into()));

        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("boom"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_retryable() {
        let task_id = TaskId::new();
        let timeout = AgentError::Timeout(std::time::Duration::from_secs(1));
        assert!(timeout.is_retryable());

        let wrapped = AgentError::worker(&task_id, None, timeout);
        assert!(wrapped.is_retryable());

        assert!(!AgentError::NoPendingStep(task_id).is_retryable());
    }

    #[test]
    fn test_from_anyhow() {
        let err: AgentError = anyhow::anyhow!("worker blew up").into();
        assert!(matches!(err, AgentError::Other(ref msg) if msg == "worker blew up"));
    }
}
