//! Task infrastructure for background workflow execution.
//!
//! - [`Task`] — task model with lifecycle states and TTL
//! - [`TaskStore`] — in-process registry with a background sweeper
//! - [`WorkflowRegistry`] — name-to-function table, immutable after startup
//! - [`spawn_workflow`] — schedules a workflow and records its outcome
//!
//! # Architecture
//!
//! ```text
//! handler calls store.create(type, args)
//!     │
//!     └─► spawn_workflow(registry, type, ctx)
//!             ├─► update_status(working)
//!             ├─► workflow fn (upstream calls, progress, checkpoints)
//!             └─► set_result / set_error + terminal status
//! ```

mod registry;
mod runner;
mod store;
mod task;

pub use registry::{WorkflowCtx, WorkflowRegistry, WorkflowResult};
pub use runner::spawn_workflow;
pub use store::{SweeperHandle, TaskStore, TaskStoreConfig};
pub use task::{task_id, Task, TaskError, TaskProgress, TaskStatus, WorkflowError};
