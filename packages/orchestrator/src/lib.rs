//! Workflow orchestration layer over the websets search/enrichment upstream.
//!
//! Turns short-lived tool calls into durable, observable, cancellable
//! background tasks. The pieces:
//!
//! - [`kernel::tasks`] — in-process task store, workflow registry, runner
//! - [`workflows`] — named workflow implementations (`lifecycle.harvest`,
//!   `convergent.search`, `adversarial.verify`, `research.deep`,
//!   `research.verifiedCollection`, `qd.winnow`, `semantic.cron`)
//! - [`projections`] — boundary projection of verbose upstream objects
//! - [`handlers`] — operation dispatch (`tasks.*` plus pass-throughs)
//!
//! # Architecture
//!
//! ```text
//! dispatch({operation, args})
//!     │
//!     ├─► tasks.create ──► TaskStore.create ──► spawn_workflow
//!     │                                             │
//!     │                                             └─► workflow fn
//!     │                                                   ├─► upstream calls (WebsetsApi)
//!     │                                                   ├─► progress updates (TaskStore)
//!     │                                                   └─► cancellation checkpoints
//!     └─► tasks.get / tasks.result / tasks.cancel ──► TaskStore
//! ```

pub mod common;
pub mod handlers;
pub mod kernel;
pub mod projections;
pub mod workflows;
