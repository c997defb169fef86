//! In-process task store.
//!
//! The single source of truth for task status, progress, and results. All
//! operations are synchronous and safe under concurrent calls; a single
//! task's lifecycle is linearizable behind the store lock. Tasks live for
//! one process lifetime only; a background sweeper evicts expired records.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::task::{Task, TaskError, TaskProgress, TaskStatus};

/// Configuration for the task store.
#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    /// Soft cap on concurrent non-terminal tasks.
    pub max_concurrent: usize,
    /// How long terminal tasks stay queryable.
    pub ttl: Duration,
    /// Cadence of the background cleanup sweep.
    pub sweep_interval: Duration,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Registry of tasks with lifecycle enforcement.
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    config: TaskStoreConfig,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(TaskStoreConfig::default())
    }
}

impl TaskStore {
    pub fn new(config: TaskStoreConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a pending task, enforcing the concurrency cap.
    pub fn create(&self, task_type: &str, args: serde_json::Value) -> Result<Task> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());

        let live = tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count();
        if live >= self.config.max_concurrent {
            bail!(
                "too many concurrent tasks ({live} >= {}); retry after some finish",
                self.config.max_concurrent
            );
        }

        let mut task = Task::new(task_type, args);
        task.expires_at = task.created_at + chrono::Duration::from_std(self.config.ttl)?;
        tasks.insert(task.id.clone(), task.clone());

        debug!(task_id = %task.id, task_type = %task_type, "task created");
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// List tasks, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Advance a task's status. Illegal transitions are ignored and return false.
    pub fn update_status(&self, id: &str, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };
        if !task.status.can_transition_to(status) {
            warn!(task_id = %id, from = ?task.status, to = ?status, "illegal status transition ignored");
            return false;
        }
        task.status = status;
        task.updated_at = Utc::now();
        if status.is_terminal() {
            // TTL countdown starts at the terminal transition.
            task.expires_at = task.updated_at
                + chrono::Duration::from_std(self.config.ttl)
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
        }
        true
    }

    /// Progress is a hint, not a synchronization point.
    pub fn update_progress(&self, id: &str, progress: TaskProgress) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(id) {
            if task.status.is_terminal() {
                return;
            }
            task.progress = progress;
            task.updated_at = Utc::now();
        }
    }

    /// Store the final result. Ignored once the task is terminal.
    pub fn set_result(&self, id: &str, result: serde_json::Value) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(id) {
            if task.status.is_terminal() {
                return;
            }
            task.result = Some(result);
            task.updated_at = Utc::now();
        }
    }

    /// Store the error record. Ignored once the task is terminal.
    pub fn set_error(&self, id: &str, error: TaskError) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(id) {
            if task.status.is_terminal() {
                return;
            }
            task.error = Some(error);
            task.updated_at = Utc::now();
        }
    }

    /// Checkpoint written before completion (webset ids, partial items).
    pub fn set_partial_result(&self, id: &str, partial: serde_json::Value) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(id) {
            if task.status.is_terminal() {
                return;
            }
            task.partial_result = Some(partial);
            task.updated_at = Utc::now();
        }
    }

    /// Advisory cancellation: flips status; workflows observe it at their
    /// next checkpoint. Returns false for unknown or already-terminal tasks.
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = self.update_status(id, TaskStatus::Cancelled);
        if cancelled {
            info!(task_id = %id, "task cancelled");
        }
        cancelled
    }

    /// Whether a task has been cancelled (workflow checkpoint probe).
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.get(id)
            .map(|t| t.status == TaskStatus::Cancelled)
            .unwrap_or(true)
    }

    /// Remove a record even if live.
    pub fn delete(&self, id: &str) -> bool {
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    /// Evict expired terminal tasks; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.expires_at <= now));
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "swept expired tasks");
        }
        removed
    }

    /// Spawn the periodic cleanup sweeper. Dropping (or shutting down) the
    /// returned handle stops it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let store = Arc::clone(self);
        let interval = store.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate tick
            loop {
                ticker.tick().await;
                store.cleanup();
            }
        });
        SweeperHandle { handle }
    }
}

/// Guard for the background sweeper task.
pub struct SweeperHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::default()
    }

    #[test]
    fn create_then_get_roundtrips() {
        let store = store();
        let task = store
            .create("lifecycle.harvest", serde_json::json!({"query": "q"}))
            .unwrap();
        let fetched = store.get(&task.id).unwrap();
        assert_eq!(fetched.task_type, "lifecycle.harvest");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[test]
    fn create_fails_past_concurrency_cap() {
        let store = TaskStore::new(TaskStoreConfig {
            max_concurrent: 2,
            ..Default::default()
        });
        store.create("a", serde_json::Value::Null).unwrap();
        store.create("a", serde_json::Value::Null).unwrap();
        assert!(store.create("a", serde_json::Value::Null).is_err());
    }

    #[test]
    fn terminal_tasks_do_not_count_against_cap() {
        let store = TaskStore::new(TaskStoreConfig {
            max_concurrent: 1,
            ..Default::default()
        });
        let task = store.create("a", serde_json::Value::Null).unwrap();
        store.update_status(&task.id, TaskStatus::Working);
        store.update_status(&task.id, TaskStatus::Completed);
        assert!(store.create("a", serde_json::Value::Null).is_ok());
    }

    #[test]
    fn result_is_immutable_after_terminal() {
        let store = store();
        let task = store.create("a", serde_json::Value::Null).unwrap();
        store.update_status(&task.id, TaskStatus::Working);
        store.set_result(&task.id, serde_json::json!({"v": 1}));
        store.update_status(&task.id, TaskStatus::Completed);
        store.set_result(&task.id, serde_json::json!({"v": 2}));
        assert_eq!(
            store.get(&task.id).unwrap().result,
            Some(serde_json::json!({"v": 1}))
        );
    }

    #[test]
    fn no_backward_transitions() {
        let store = store();
        let task = store.create("a", serde_json::Value::Null).unwrap();
        store.update_status(&task.id, TaskStatus::Working);
        store.update_status(&task.id, TaskStatus::Completed);
        assert!(!store.update_status(&task.id, TaskStatus::Working));
        assert_eq!(store.get(&task.id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn cancel_pending_task() {
        let store = store();
        let task = store.create("a", serde_json::Value::Null).unwrap();
        assert!(store.cancel(&task.id));
        assert!(store.is_cancelled(&task.id));
        // Second cancel is a no-op.
        assert!(!store.cancel(&task.id));
    }

    #[test]
    fn cancel_unknown_task_returns_false() {
        assert!(!store().cancel("task_missing"));
    }

    #[test]
    fn cleanup_evicts_only_expired_terminal_tasks() {
        let store = TaskStore::new(TaskStoreConfig {
            ttl: Duration::from_secs(0),
            ..Default::default()
        });
        let done = store.create("a", serde_json::Value::Null).unwrap();
        store.update_status(&done.id, TaskStatus::Working);
        store.update_status(&done.id, TaskStatus::Completed);
        let live = store.create("a", serde_json::Value::Null).unwrap();

        assert_eq!(store.cleanup(), 1);
        assert!(store.get(&done.id).is_none());
        assert!(store.get(&live.id).is_some());
    }

    #[test]
    fn list_filters_by_status() {
        let store = store();
        let a = store.create("a", serde_json::Value::Null).unwrap();
        let _b = store.create("b", serde_json::Value::Null).unwrap();
        store.update_status(&a.id, TaskStatus::Working);

        assert_eq!(store.list(Some(TaskStatus::Working)).len(), 1);
        assert_eq!(store.list(Some(TaskStatus::Pending)).len(), 1);
        assert_eq!(store.list(None).len(), 2);
    }

    #[test]
    fn delete_removes_live_tasks() {
        let store = store();
        let task = store.create("a", serde_json::Value::Null).unwrap();
        assert!(store.delete(&task.id));
        assert!(!store.delete(&task.id));
    }
}
