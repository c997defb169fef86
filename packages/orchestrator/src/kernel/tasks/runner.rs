//! Workflow runner: schedules a workflow on a worker and records its outcome.
//!
//! The creating caller is never joined on the spawned worker; it polls the
//! task store via `tasks.get` / `tasks.result`.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::registry::{WorkflowCtx, WorkflowRegistry};
use super::task::TaskStatus;

/// Spawn the named workflow in the background and return immediately.
///
/// Status transitions, result capture, and error capture all happen on the
/// worker; thrown [`WorkflowError`](super::task::WorkflowError)s become
/// failed-task records, returned values become completed-task records, and
/// a `None` return leaves the cancelled status in place.
pub fn spawn_workflow(registry: Arc<WorkflowRegistry>, workflow_type: String, ctx: WorkflowCtx) {
    tokio::spawn(async move {
        let task_id = ctx.task_id.clone();
        let store = ctx.store.clone();

        if !store.update_status(&task_id, TaskStatus::Working) {
            // Cancelled (or deleted) before the worker picked it up.
            warn!(task_id = %task_id, "task not startable, skipping execution");
            return;
        }

        info!(task_id = %task_id, workflow = %workflow_type, "workflow starting");
        let started = std::time::Instant::now();

        match registry.execute(&workflow_type, ctx).await {
            Ok(Some(result)) => {
                store.set_result(&task_id, result);
                store.update_status(&task_id, TaskStatus::Completed);
                info!(
                    task_id = %task_id,
                    workflow = %workflow_type,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "workflow completed"
                );
            }
            Ok(None) => {
                // The workflow observed cancellation and unwound; make sure the
                // status reflects it even if the cancel raced the final write.
                if !store.is_cancelled(&task_id) {
                    store.update_status(&task_id, TaskStatus::Cancelled);
                }
                info!(task_id = %task_id, workflow = %workflow_type, "workflow cancelled");
            }
            Err(err) => {
                error!(
                    task_id = %task_id,
                    workflow = %workflow_type,
                    step = %err.step,
                    error = %err.message,
                    "workflow failed"
                );
                store.set_error(&task_id, err.into());
                store.update_status(&task_id, TaskStatus::Failed);
            }
        }
    });
}
