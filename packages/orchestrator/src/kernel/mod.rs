//! Kernel-level infrastructure: configuration, shared dependencies, and the
//! task subsystem. Business logic stays in `workflows`.

pub mod config;
pub mod tasks;

use std::sync::Arc;

use websets_client::WebsetsApi;

use crate::workflows;
use config::Settings;
use tasks::{TaskStore, WorkflowRegistry};

/// Shared dependencies passed to handlers and workflows.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub client: Arc<dyn WebsetsApi>,
    pub store: Arc<TaskStore>,
    pub registry: Arc<WorkflowRegistry>,
}

impl OrchestratorDeps {
    /// Wire up dependencies around an upstream client.
    pub fn new(client: Arc<dyn WebsetsApi>, settings: &Settings) -> Self {
        Self {
            client,
            store: Arc::new(TaskStore::new(settings.task_store.clone())),
            registry: Arc::new(workflows::build_workflow_registry()),
        }
    }
}
