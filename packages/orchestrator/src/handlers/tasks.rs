//! Task lifecycle handlers: create, get, result, list, cancel.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::kernel::tasks::{spawn_workflow, TaskStatus, WorkflowCtx};
use crate::kernel::OrchestratorDeps;

fn require_task_id(args: &Value) -> Result<String> {
    args.get("taskId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .context("taskId is required")
}

/// `tasks.create` — create the task record and schedule the workflow.
/// Returns immediately; the caller polls via `tasks.get` / `tasks.result`.
pub fn create(deps: &OrchestratorDeps, args: Value) -> Result<Value> {
    let workflow_type = args
        .get("type")
        .and_then(|v| v.as_str())
        .context("type is required")?
        .to_string();
    if !deps.registry.is_registered(&workflow_type) {
        bail!(
            "unknown workflow type: {workflow_type} (available: {})",
            deps.registry.registered_types().join(", ")
        );
    }

    let task = deps.store.create(&workflow_type, args.clone())?;
    spawn_workflow(
        deps.registry.clone(),
        workflow_type,
        WorkflowCtx {
            task_id: task.id.clone(),
            args,
            client: deps.client.clone(),
            store: deps.store.clone(),
        },
    );

    Ok(json!({"taskId": task.id, "status": task.status}))
}

/// `tasks.get` — status and progress in summary form.
pub fn get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let task_id = require_task_id(args)?;
    let task = deps
        .store
        .get(&task_id)
        .with_context(|| format!("task not found: {task_id}"))?;
    Ok(task.summary())
}

/// `tasks.result` — the final result for completed tasks; otherwise the
/// current status. Never blocks.
pub fn result(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let task_id = require_task_id(args)?;
    let task = deps
        .store
        .get(&task_id)
        .with_context(|| format!("task not found: {task_id}"))?;

    match task.status {
        TaskStatus::Completed => Ok(task.result.unwrap_or(Value::Null)),
        TaskStatus::Failed => Ok(json!({
            "status": task.status,
            "error": task.error,
            "partialResult": task.partial_result,
        })),
        TaskStatus::Cancelled => Ok(json!({"status": task.status})),
        TaskStatus::Pending | TaskStatus::Working => Ok(json!({
            "status": task.status,
            "progress": task.progress,
        })),
    }
}

/// `tasks.list` — summaries, optionally filtered by status.
pub fn list(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let status = args
        .get("status")
        .and_then(|v| v.as_str())
        .map(|raw| {
            serde_json::from_value::<TaskStatus>(Value::String(raw.to_string()))
                .with_context(|| format!("invalid status filter: {raw}"))
        })
        .transpose()?;

    let tasks: Vec<Value> = deps
        .store
        .list(status)
        .iter()
        .map(|t| t.summary())
        .collect();
    Ok(json!(tasks))
}

/// `tasks.cancel` — advisory cancellation.
pub fn cancel(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let task_id = require_task_id(args)?;
    Ok(json!({"cancelled": deps.store.cancel(&task_id)}))
}
