//! Task model for background workflow execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;
use uuid::Uuid;
use websets_client::WebsetsError;

/// Generate a new task identifier.
pub fn task_id() -> String {
    format!("task_{}", Uuid::new_v4().simple())
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Legal transitions: pending → working → {completed | failed | cancelled},
    /// plus cancelling a task that never started.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(
                next,
                TaskStatus::Working | TaskStatus::Cancelled | TaskStatus::Failed
            ),
            TaskStatus::Working => next.is_terminal(),
            _ => false,
        }
    }
}

// ============================================================================
// Progress and errors
// ============================================================================

/// Progress hint updated by the running workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub current_step: String,
    pub completed_steps: u32,
    pub total_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn at_step(current_step: impl Into<String>, completed: u32, total: u32) -> Self {
        Self {
            current_step: current_step.into(),
            completed_steps: completed,
            total_steps: total,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Error record stored on a failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub step: String,
    pub message: String,
    pub recoverable: bool,
}

/// Error raised inside a workflow, carrying the step it failed at.
///
/// The runner converts these into [`TaskError`] records; they never escape
/// the workflow boundary as panics.
#[derive(Debug, Clone, Error)]
#[error("step {step}: {message}")]
pub struct WorkflowError {
    pub step: String,
    pub message: String,
    pub recoverable: bool,
}

impl WorkflowError {
    /// Missing or invalid arguments, schema violations. Never recoverable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            step: "validate".to_string(),
            message: message.into(),
            recoverable: false,
        }
    }

    /// A failed upstream call; recoverable iff the fault is transient.
    pub fn upstream(step: impl Into<String>, err: &WebsetsError) -> Self {
        Self {
            step: step.into(),
            message: err.to_string(),
            recoverable: err.is_transient(),
        }
    }

    /// Unexpected internal failure.
    pub fn internal(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            recoverable: false,
        }
    }
}

impl From<WorkflowError> for TaskError {
    fn from(err: WorkflowError) -> Self {
        Self {
            step: err.step,
            message: err.message,
            recoverable: err.recoverable,
        }
    }
}

// ============================================================================
// Task model
// ============================================================================

/// One in-flight or completed execution of a named workflow.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Task {
    #[builder(default = task_id())]
    pub id: String,

    /// Registered workflow type name (e.g. "lifecycle.harvest").
    #[serde(rename = "type")]
    pub task_type: String,

    #[builder(default)]
    pub status: TaskStatus,

    #[builder(default)]
    pub progress: TaskProgress,

    /// Opaque argument map supplied at creation.
    #[builder(default = serde_json::Value::Null)]
    pub args: serde_json::Value,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Checkpoint written before completion so callers can recover manually.
    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_result: Option<serde_json::Value>,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default = Utc::now() + chrono::Duration::hours(1))]
    pub expires_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task for a workflow type.
    pub fn new(task_type: impl Into<String>, args: serde_json::Value) -> Self {
        Self::builder().task_type(task_type).args(args).build()
    }

    /// Summary form returned by `tasks.list` / `tasks.get`.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.task_type,
            "status": self.status,
            "progress": self.progress,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new("lifecycle.harvest", serde_json::json!({"query": "q"}))
    }

    #[test]
    fn new_task_starts_pending() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.id.starts_with("task_"));
    }

    #[test]
    fn expiry_is_at_least_creation_plus_ttl() {
        let task = sample_task();
        assert!(task.expires_at >= task.created_at);
    }

    #[test]
    fn pending_can_start_or_cancel() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Working));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn working_only_moves_to_terminal() {
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Working.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Working.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn terminal_states_never_transition() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert!(!status.can_transition_to(TaskStatus::Working));
            assert!(!status.can_transition_to(TaskStatus::Pending));
        }
    }

    #[test]
    fn validation_error_is_non_recoverable_at_validate_step() {
        let err = WorkflowError::validation("query is required");
        assert_eq!(err.step, "validate");
        assert!(!err.recoverable);
    }

    #[test]
    fn upstream_transient_error_is_recoverable() {
        let err = WorkflowError::upstream(
            "create_webset",
            &WebsetsError::Api {
                status: 503,
                message: "unavailable".into(),
            },
        );
        assert!(err.recoverable);
    }
}
