//! `adversarial.verify` — search for supporting and disconfirming evidence
//! sequentially, then optionally synthesize a verdict with one deep-research
//! call built deterministically from both item sets.

use serde_json::{json, Value};
use websets_client::{CreateResearchParams, WebsetItem};

use super::helpers::{
    self, collect_items, optional_bool, optional_u64, poll_until_idle, require_str, PollOptions,
    StepTracker,
};
use super::research::{poll_research, ResearchPollOutcome};
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::{enrichment_descriptions, entity_name, project_item, project_research};

const TOTAL_STEPS: u32 = 5;

/// Bullet-list summary of an item set for the synthesis prompt.
fn summarize(items: &[WebsetItem], limit: usize) -> String {
    if items.is_empty() {
        return "(none found)".to_string();
    }
    items
        .iter()
        .take(limit)
        .map(|item| {
            let name = entity_name(&item.properties);
            let url = item.url().unwrap_or("no url");
            let description = item
                .properties
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            format!("- {name} ({url}): {description}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn synthesis_prompt(claim: &str, supporting: &[WebsetItem], disconfirming: &[WebsetItem]) -> String {
    format!(
        "Claim under review: {claim}\n\n\
         Supporting evidence found:\n{}\n\n\
         Disconfirming evidence found:\n{}\n\n\
         Weigh both evidence sets and assess whether the claim holds. \
         State the strongest counterargument explicitly.",
        summarize(supporting, 10),
        summarize(disconfirming, 10),
    )
}

struct EvidenceSide {
    webset_id: String,
    items: Vec<WebsetItem>,
    projected: Vec<Value>,
    timed_out: bool,
}

async fn gather_side(
    ctx: &WorkflowCtx,
    query: String,
    count: u64,
    step: &str,
    step_index: u32,
    opts: &PollOptions,
) -> Result<Option<EvidenceSide>, WorkflowError> {
    let params = helpers::webset_params(&query, count, &ctx.args)?;
    let webset = ctx
        .client
        .create_webset(params)
        .await
        .map_err(|e| WorkflowError::upstream(step, &e))?;

    let outcome = poll_until_idle(ctx, &webset.id, step, (step_index, TOTAL_STEPS), opts).await?;
    if outcome.cancelled {
        return Ok(None);
    }

    let items = collect_items(ctx, &webset.id, (count * 2) as usize, step).await?;
    let enrich_map = enrichment_descriptions(&outcome.webset);
    let projected = items
        .iter()
        .filter_map(|i| serde_json::to_value(i).ok())
        .map(|v| project_item(&v, &enrich_map))
        .collect();

    Ok(Some(EvidenceSide {
        webset_id: webset.id,
        items,
        projected,
        timed_out: outcome.timed_out,
    }))
}

pub async fn run(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let claim = require_str(&ctx.args, "claim")?;
    helpers::require_entity(&ctx.args)?;
    let count = optional_u64(&ctx.args, "count", 10);
    let synthesize = optional_bool(&ctx.args, "synthesize", true);
    let opts = PollOptions::from_args(&ctx.args);

    steps.begin("supporting_search");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("supporting_search", 1, TOTAL_STEPS),
    );
    let Some(supporting) = gather_side(
        &ctx,
        format!("supporting evidence: {claim}"),
        count,
        "supporting_search",
        1,
        &opts,
    )
    .await?
    else {
        return Ok(None);
    };
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"websetIds": [supporting.webset_id]}));

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&supporting.webset_id)).await;
        return Ok(None);
    }

    steps.begin("disconfirming_search");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("disconfirming_search", 2, TOTAL_STEPS),
    );
    let Some(disconfirming) = gather_side(
        &ctx,
        format!("disconfirming evidence: {claim}"),
        count,
        "disconfirming_search",
        2,
        &opts,
    )
    .await?
    else {
        helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&supporting.webset_id)).await;
        return Ok(None);
    };
    ctx.store.set_partial_result(
        &ctx.task_id,
        json!({"websetIds": [supporting.webset_id, disconfirming.webset_id]}),
    );

    let synthesis = if synthesize {
        // Cancellation checkpoint before the research call.
        if helpers::is_cancelled(&ctx) {
            helpers::cancel_owned_websets(
                &ctx,
                &[supporting.webset_id.clone(), disconfirming.webset_id.clone()],
            )
            .await;
            return Ok(None);
        }
        steps.begin("synthesize");
        ctx.store.update_progress(
            &ctx.task_id,
            TaskProgress::at_step("synthesize", 3, TOTAL_STEPS),
        );
        let prompt = synthesis_prompt(&claim, &supporting.items, &disconfirming.items);
        let research = ctx
            .client
            .create_research(CreateResearchParams {
                instructions: prompt,
                model: None,
                output_schema: None,
            })
            .await
            .map_err(|e| WorkflowError::upstream("synthesize", &e))?;
        match poll_research(&ctx, &research.id, "synthesize", &opts).await? {
            ResearchPollOutcome::Finished(r) => Some(project_research(&r)),
            ResearchPollOutcome::TimedOut(r) => {
                let mut v = project_research(&r);
                v["timedOut"] = json!(true);
                Some(v)
            }
            ResearchPollOutcome::Cancelled => {
                helpers::cancel_owned_websets(
                    &ctx,
                    &[supporting.webset_id.clone(), disconfirming.webset_id.clone()],
                )
                .await;
                return Ok(None);
            }
        }
    } else {
        None
    };

    steps.begin("finalize");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("finalize", TOTAL_STEPS, TOTAL_STEPS),
    );

    let timed_out = supporting.timed_out || disconfirming.timed_out;
    let mut result = json!({
        "claim": claim,
        "supporting": {
            "websetId": supporting.webset_id,
            "itemCount": supporting.projected.len(),
            "items": supporting.projected,
        },
        "disconfirming": {
            "websetId": disconfirming.webset_id,
            "itemCount": disconfirming.projected.len(),
            "items": disconfirming.projected,
        },
        "synthesis": synthesis,
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}
