//! Operation dispatch.
//!
//! All functionality is surfaced through `dispatch({operation, args})`:
//! task lifecycle operations plus thin pass-throughs to the upstream with
//! projections applied at the boundary.

mod passthrough;
mod tasks;

use anyhow::{bail, Result};
use serde_json::Value;

use crate::kernel::OrchestratorDeps;

/// Route one operation to its handler.
pub async fn dispatch(deps: &OrchestratorDeps, operation: &str, args: Value) -> Result<Value> {
    match operation {
        "tasks.create" => tasks::create(deps, args),
        "tasks.get" => tasks::get(deps, &args),
        "tasks.result" => tasks::result(deps, &args),
        "tasks.list" => tasks::list(deps, &args),
        "tasks.cancel" => tasks::cancel(deps, &args),

        "websets.create" => passthrough::websets_create(deps, &args).await,
        "websets.get" => passthrough::websets_get(deps, &args).await,
        "websets.cancel" => passthrough::websets_cancel(deps, &args).await,
        "websets.delete" => passthrough::websets_delete(deps, &args).await,
        "items.list" => passthrough::items_list(deps, &args).await,
        "enrichments.create" => passthrough::enrichments_create(deps, &args).await,
        "enrichments.get" => passthrough::enrichments_get(deps, &args).await,
        "enrichments.list" => passthrough::enrichments_list(deps, &args).await,
        "imports.create" => passthrough::imports_create(deps, &args).await,
        "imports.get" => passthrough::imports_get(deps, &args).await,
        "imports.list" => passthrough::imports_list(deps, &args).await,
        "events.get" => passthrough::events_get(deps, &args).await,
        "events.list" => passthrough::events_list(deps, &args).await,
        "monitors.create" => passthrough::monitors_create(deps, &args).await,
        "research.create" => passthrough::research_create(deps, &args).await,
        "research.get" => passthrough::research_get(deps, &args).await,

        other => bail!("unknown operation: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::kernel::tasks::{TaskStore, TaskStoreConfig};
    use crate::workflows::build_workflow_registry;
    use crate::workflows::helpers::testing::MockApi;

    pub(crate) fn test_deps() -> OrchestratorDeps {
        OrchestratorDeps {
            client: Arc::new(MockApi::new()),
            store: Arc::new(TaskStore::new(TaskStoreConfig::default())),
            registry: Arc::new(build_workflow_registry()),
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error_value() {
        let deps = test_deps();
        let err = dispatch(&deps, "nope.missing", Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown operation"));
    }
}
