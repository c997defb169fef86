//! Workflow registry mapping type names to implementations.
//!
//! Each workflow registers a function at startup; the registry is immutable
//! afterwards. The runner looks up the function by the task's type name and
//! drives it to completion on a spawned worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use websets_client::WebsetsApi;

use super::store::TaskStore;
use super::task::WorkflowError;

/// Everything a workflow function needs: its task identity, arguments, the
/// upstream client, and the task store for progress/cancellation.
#[derive(Clone)]
pub struct WorkflowCtx {
    pub task_id: String,
    pub args: serde_json::Value,
    pub client: Arc<dyn WebsetsApi>,
    pub store: Arc<TaskStore>,
}

/// Outcome of a workflow run. `Ok(None)` means the workflow observed
/// cancellation and unwound; the task keeps its `cancelled` status.
pub type WorkflowResult = Result<Option<serde_json::Value>, WorkflowError>;

type BoxedWorkflowFn =
    Box<dyn Fn(WorkflowCtx) -> Pin<Box<dyn Future<Output = WorkflowResult> + Send>> + Send + Sync>;

/// Name-to-function table of workflow implementations.
#[derive(Default)]
pub struct WorkflowRegistry {
    registrations: HashMap<&'static str, BoxedWorkflowFn>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a workflow function under a unique type name.
    pub fn register<F, Fut>(&mut self, workflow_type: &'static str, f: F)
    where
        F: Fn(WorkflowCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkflowResult> + Send + 'static,
    {
        self.registrations
            .insert(workflow_type, Box::new(move |ctx| Box::pin(f(ctx))));
    }

    /// Execute the workflow registered under `workflow_type`.
    pub async fn execute(&self, workflow_type: &str, ctx: WorkflowCtx) -> WorkflowResult {
        let f = self.registrations.get(workflow_type).ok_or_else(|| {
            WorkflowError::internal("dispatch", format!("unknown workflow type: {workflow_type}"))
        })?;
        f(ctx).await
    }

    pub fn is_registered(&self, workflow_type: &str) -> bool {
        self.registrations.contains_key(workflow_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.registrations.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(store: Arc<TaskStore>) -> WorkflowCtx {
        WorkflowCtx {
            task_id: "task_test".into(),
            args: serde_json::Value::Null,
            client: Arc::new(crate::workflows::helpers::testing::NullApi),
            store,
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = WorkflowRegistry::new();
        registry.register("echo", |_ctx| async move {
            Ok(Some(serde_json::json!({"ok": true})))
        });

        assert!(registry.is_registered("echo"));
        let result = registry
            .execute("echo", ctx(Arc::new(TaskStore::default())))
            .await
            .unwrap();
        assert_eq!(result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .execute("nope", ctx(Arc::new(TaskStore::default())))
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown workflow type"));
    }
}
