//! `lifecycle.harvest` — create one webset, drive it to idle, collect items.
//!
//! The simplest workflow; the full create → poll → collect → cleanup
//! lifecycle in one pass. Partial-item results on timeout are allowed.

use serde_json::json;

use super::helpers::{
    self, collect_items, optional_bool, optional_u64, poll_until_idle, require_str, PollOptions,
    StepTracker,
};
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::{enrichment_descriptions, project_item};

const TOTAL_STEPS: u32 = 4;

pub async fn run(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let query = require_str(&ctx.args, "query")?;
    let count = optional_u64(&ctx.args, "count", 10);
    let cleanup = optional_bool(&ctx.args, "cleanup", false);
    let params = helpers::webset_params(&query, count, &ctx.args)?;
    let opts = PollOptions::from_args(&ctx.args);

    steps.begin("create_webset");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("create_webset", 0, TOTAL_STEPS),
    );
    let webset = ctx
        .client
        .create_webset(params)
        .await
        .map_err(|e| WorkflowError::upstream("create_webset", &e))?;

    // Keep the webset id recoverable if anything below fails.
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"websetId": webset.id}));

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&webset.id)).await;
        return Ok(None);
    }

    steps.begin("poll");
    let outcome = poll_until_idle(&ctx, &webset.id, "poll", (1, TOTAL_STEPS), &opts).await?;
    if outcome.cancelled {
        return Ok(None);
    }

    steps.begin("collect");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("collect", 2, TOTAL_STEPS));
    let cap = (count * 2) as usize;
    let items = collect_items(&ctx, &webset.id, cap, "collect").await?;

    steps.begin("finalize");
    let final_webset = outcome.webset;
    let enrich_map = enrichment_descriptions(&final_webset);
    let projected: Vec<_> = items
        .iter()
        .filter_map(|i| serde_json::to_value(i).ok())
        .map(|v| project_item(&v, &enrich_map))
        .collect();
    let search_progress = final_webset
        .latest_search()
        .and_then(|s| s.progress.clone());

    if cleanup {
        if let Err(e) = ctx.client.delete_webset(&final_webset.id).await {
            tracing::warn!(webset_id = %final_webset.id, error = %e, "webset cleanup failed");
        }
    }

    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("finalize", TOTAL_STEPS, TOTAL_STEPS),
    );

    let mut result = json!({
        "websetId": final_webset.id,
        "items": projected,
        "itemCount": projected.len(),
        "searchProgress": search_progress,
        "enrichmentCount": final_webset.enrichments.len(),
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if outcome.timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}
