//! Named workflow implementations and their registry.
//!
//! Each workflow is an async function over [`WorkflowCtx`]; registration
//! happens once at startup and the registry is immutable afterwards.

pub mod adversarial;
pub mod convergent;
pub mod harvest;
pub mod helpers;
pub mod qd_winnow;
pub mod research;
pub mod semantic_cron;

use crate::kernel::tasks::WorkflowRegistry;

/// Build the registry with every workflow this process serves.
pub fn build_workflow_registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register("lifecycle.harvest", harvest::run);
    registry.register("convergent.search", convergent::run);
    registry.register("adversarial.verify", adversarial::run);
    registry.register("research.deep", research::run_deep);
    registry.register("research.verifiedCollection", research::run_verified_collection);
    registry.register("qd.winnow", qd_winnow::run);
    registry.register("semantic.cron", semantic_cron::run);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_serves_all_workflow_types() {
        let registry = build_workflow_registry();
        for workflow_type in [
            "lifecycle.harvest",
            "convergent.search",
            "adversarial.verify",
            "research.deep",
            "research.verifiedCollection",
            "qd.winnow",
            "semantic.cron",
        ] {
            assert!(registry.is_registered(workflow_type), "{workflow_type}");
        }
    }

    #[test]
    fn unknown_types_are_not_registered() {
        let registry = build_workflow_registry();
        assert!(!registry.is_registered("lifecycle.unknown"));
    }
}
