//! Deep-research workflows: `research.deep` dispatches one research run;
//! `research.verifiedCollection` harvests a webset and researches the top
//! items with bounded parallelism.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use websets_client::{CreateResearchParams, Research};

use super::helpers::{
    self, collect_items, optional_str, optional_u64, poll_until_idle, require_str, PollOptions,
    StepTracker,
};
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::{enrichment_descriptions, entity_name, project_item, project_research};

/// Concurrent research calls allowed per task.
const RESEARCH_CONCURRENCY: usize = 3;

const DEFAULT_PROMPT_TEMPLATE: &str = "Research {{name}} ({{url}}). Context: {{description}}. \
     Verify what this entity actually does and surface anything that contradicts the context.";

/// Outcome of polling one research run.
pub enum ResearchPollOutcome {
    Finished(Research),
    TimedOut(Research),
    Cancelled,
}

/// Poll a research run to a finished state within the step deadline.
///
/// Task cancellation is observed between polls; the deadline is reported,
/// not raised, mirroring the webset poller.
pub async fn poll_research(
    ctx: &WorkflowCtx,
    research_id: &str,
    step: &str,
    opts: &PollOptions,
) -> Result<ResearchPollOutcome, WorkflowError> {
    let deadline = std::time::Instant::now() + opts.timeout;

    loop {
        let research = ctx
            .client
            .get_research(research_id)
            .await
            .map_err(|e| WorkflowError::upstream(step, &e))?;

        if research.status.is_finished() {
            return Ok(ResearchPollOutcome::Finished(research));
        }
        if ctx.store.is_cancelled(&ctx.task_id) {
            return Ok(ResearchPollOutcome::Cancelled);
        }
        if std::time::Instant::now() >= deadline {
            return Ok(ResearchPollOutcome::TimedOut(research));
        }
        tokio::time::sleep(opts.interval).await;
    }
}

/// Fill the `{{name}}` / `{{url}}` / `{{description}}` placeholders.
pub fn render_prompt(template: &str, name: &str, url: &str, description: &str) -> String {
    template
        .replace("{{name}}", name)
        .replace("{{url}}", url)
        .replace("{{description}}", description)
}

// ============================================================================
// research.deep
// ============================================================================

pub async fn run_deep(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let instructions = require_str(&ctx.args, "instructions")?;
    let model = optional_str(&ctx.args, "model");
    let output_schema = ctx.args.get("outputSchema").cloned();
    let opts = PollOptions::from_args(&ctx.args);

    if helpers::is_cancelled(&ctx) {
        return Ok(None);
    }

    steps.begin("create_research");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("create_research", 0, 2));
    let research = ctx
        .client
        .create_research(CreateResearchParams {
            instructions,
            model,
            output_schema,
        })
        .await
        .map_err(|e| WorkflowError::upstream("create_research", &e))?;
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"researchId": research.id}));

    steps.begin("poll_research");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("poll_research", 1, 2));
    let (research, timed_out) = match poll_research(&ctx, &research.id, "poll_research", &opts).await? {
        ResearchPollOutcome::Finished(r) => (r, false),
        ResearchPollOutcome::TimedOut(r) => (r, true),
        ResearchPollOutcome::Cancelled => return Ok(None),
    };

    let projected = project_research(&research);
    let mut result = json!({
        "researchId": research.id,
        "status": research.status,
        "result": projected["result"],
        "model": research.model,
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}

// ============================================================================
// research.verifiedCollection
// ============================================================================

pub async fn run_verified_collection(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let query = require_str(&ctx.args, "query")?;
    let count = optional_u64(&ctx.args, "count", 10);
    let research_limit = optional_u64(&ctx.args, "researchLimit", 5) as usize;
    let template = optional_str(&ctx.args, "promptTemplate")
        .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string());
    let params = helpers::webset_params(&query, count, &ctx.args)?;
    let opts = PollOptions::from_args(&ctx.args);

    steps.begin("create_webset");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("create_webset", 0, 4));
    let webset = ctx
        .client
        .create_webset(params)
        .await
        .map_err(|e| WorkflowError::upstream("create_webset", &e))?;
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"websetId": webset.id}));

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&webset.id)).await;
        return Ok(None);
    }

    steps.begin("poll");
    let outcome = poll_until_idle(&ctx, &webset.id, "poll", (1, 4), &opts).await?;
    if outcome.cancelled {
        return Ok(None);
    }

    steps.begin("collect");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("collect", 2, 4));
    let items = collect_items(&ctx, &webset.id, (count * 2) as usize, "collect").await?;
    let enrich_map = enrichment_descriptions(&outcome.webset);
    let mut projected: Vec<Value> = items
        .iter()
        .filter_map(|i| serde_json::to_value(i).ok())
        .map(|v| project_item(&v, &enrich_map))
        .collect();

    steps.begin("research_items");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("research_items", 3, 4)
            .with_message(format!("{} items", projected.len().min(research_limit))),
    );

    // Research failures are captured per item, never fatal for the task.
    let semaphore = Arc::new(Semaphore::new(RESEARCH_CONCURRENCY));
    let research_results = join_all(items.iter().take(research_limit).enumerate().map(
        |(idx, item)| {
            let ctx = ctx.clone();
            let semaphore = Arc::clone(&semaphore);
            let prompt = render_prompt(
                &template,
                &entity_name(&item.properties),
                item.url().unwrap_or(""),
                item.properties
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or(""),
            );
            let poll_opts = opts.clone();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (idx, None);
                };
                if helpers::is_cancelled(&ctx) {
                    return (idx, None);
                }
                let attached = match ctx
                    .client
                    .create_research(CreateResearchParams {
                        instructions: prompt,
                        model: None,
                        output_schema: None,
                    })
                    .await
                {
                    Ok(research) => {
                        match poll_research(&ctx, &research.id, "research_items", &poll_opts).await
                        {
                            Ok(ResearchPollOutcome::Finished(r)) => project_research(&r),
                            Ok(ResearchPollOutcome::TimedOut(r)) => {
                                let mut v = project_research(&r);
                                v["timedOut"] = json!(true);
                                v
                            }
                            Ok(ResearchPollOutcome::Cancelled) => return (idx, None),
                            Err(e) => json!({"error": e.message}),
                        }
                    }
                    Err(e) => json!({"error": e.to_string()}),
                };
                (idx, Some(attached))
            }
        },
    ))
    .await;

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&webset.id)).await;
        return Ok(None);
    }

    let mut researched = 0usize;
    for (idx, attached) in research_results {
        if let Some(value) = attached {
            if value.get("error").is_none() {
                researched += 1;
            }
            if let Some(slot) = projected.get_mut(idx) {
                slot["research"] = value;
            }
        }
    }

    let item_count = projected.len();
    let mut result = json!({
        "websetId": webset.id,
        "items": projected,
        "itemCount": item_count,
        "researchedCount": researched,
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if outcome.timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}
