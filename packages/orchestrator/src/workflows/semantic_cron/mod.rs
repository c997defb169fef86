//! `semantic.cron` — a declarative engine composing N independent websets
//! ("lenses") into one composite signal.
//!
//! Pipeline per evaluation: template expansion → schema validation → webset
//! resolution (create/bind or re-evaluate) → enrichment resolution → shape
//! evaluation → cross-lens join → signal rule → snapshot (+ delta against a
//! caller-supplied previous snapshot) → best-effort monitor registration.

pub mod config;
pub mod join;
pub mod shape;
pub mod signal;
pub mod snapshot;

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use tracing::debug;
use websets_client::{
    CreateCriterionParams, CreateEnrichmentParams, CreateMonitorParams, CreateSearchParams,
    CreateWebsetParams, EntitySpec, MonitorCadence,
};

use self::config::Lens;
use self::join::{LensResult, ShapedItem};
use self::snapshot::{build_snapshot, compute_delta, Snapshot};
use super::helpers::{self, collect_items, poll_until_idle, PollOptions, StepTracker};
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::{enrichment_descriptions, entity_name};

const DEFAULT_LENS_COUNT: u64 = 25;
const BOUND_LENS_CAP: usize = 100;

fn lens_webset_params(lens: &Lens) -> Result<CreateWebsetParams, WorkflowError> {
    let search = lens.search.as_ref().ok_or_else(|| {
        WorkflowError::validation(format!("lens {} has no search spec", lens.id))
    })?;
    Ok(CreateWebsetParams {
        search: CreateSearchParams {
            query: search.query.clone(),
            count: search.count.unwrap_or(DEFAULT_LENS_COUNT),
            entity: EntitySpec {
                kind: search
                    .entity_type
                    .clone()
                    .unwrap_or_else(|| "company".to_string()),
            },
            criteria: search
                .criteria
                .iter()
                .map(|description| CreateCriterionParams {
                    description: description.clone(),
                })
                .collect(),
        },
        enrichments: search
            .enrichments
            .iter()
            .map(|e| CreateEnrichmentParams {
                description: e.description.clone(),
                format: e.format,
            })
            .collect(),
    })
}

struct ResolvedLens {
    lens_id: String,
    webset_id: String,
}

pub async fn run(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let raw_config = ctx
        .args
        .get("config")
        .cloned()
        .ok_or_else(|| WorkflowError::validation("config is required"))?;
    let variables = ctx
        .args
        .get("variables")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let expanded = config::expand_templates(&raw_config, &variables)?;
    let cron = config::parse_config(expanded)?;
    // parse_config guarantees join/signal presence.
    let join_rule = cron
        .join
        .clone()
        .ok_or_else(|| WorkflowError::validation("config.join is required"))?;
    let signal_rule = cron
        .signal
        .clone()
        .ok_or_else(|| WorkflowError::validation("config.signal is required"))?;

    let previous: Option<Snapshot> = match ctx.args.get("previousSnapshot") {
        Some(value) if !value.is_null() => Some(
            serde_json::from_value(value.clone())
                .map_err(|e| WorkflowError::validation(format!("invalid previousSnapshot: {e}")))?,
        ),
        _ => None,
    };
    let existing: HashMap<String, String> = ctx
        .args
        .get("existingWebsets")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|id| (k.clone(), id.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let reevaluation = !existing.is_empty();
    let opts = PollOptions::from_args(&ctx.args);
    let total_steps = cron.lenses.len() as u32 + 3;

    steps.begin("resolve_lenses");
    let mut resolved: Vec<ResolvedLens> = Vec::with_capacity(cron.lenses.len());
    let mut owned_ids: Vec<String> = Vec::new();
    let mut timed_out = false;

    if reevaluation {
        // Re-evaluation: no creation, no polling; every lens must resolve to
        // a known webset.
        for lens in &cron.lenses {
            let webset_id = existing
                .get(&lens.id)
                .cloned()
                .or_else(|| lens.webset_id.clone())
                .ok_or_else(|| {
                    WorkflowError::validation(format!(
                        "existingWebsets has no binding for lens {}",
                        lens.id
                    ))
                })?;
            resolved.push(ResolvedLens {
                lens_id: lens.id.clone(),
                webset_id,
            });
        }
    } else {
        for (idx, lens) in cron.lenses.iter().enumerate() {
            if helpers::is_cancelled(&ctx) {
                helpers::cancel_owned_websets(&ctx, &owned_ids).await;
                return Ok(None);
            }
            ctx.store.update_progress(
                &ctx.task_id,
                TaskProgress::at_step("resolve_lenses", idx as u32, total_steps)
                    .with_message(format!("lens {}", lens.id)),
            );

            match &lens.webset_id {
                // Bound websets are taken as-is; they are not polled even if
                // still pending.
                Some(id) => resolved.push(ResolvedLens {
                    lens_id: lens.id.clone(),
                    webset_id: id.clone(),
                }),
                None => {
                    let params = lens_webset_params(lens)?;
                    let webset = ctx
                        .client
                        .create_webset(params)
                        .await
                        .map_err(|e| WorkflowError::upstream("resolve_lenses", &e))?;
                    owned_ids.push(webset.id.clone());
                    ctx.store.set_partial_result(
                        &ctx.task_id,
                        json!({"websetIds": owned_ids}),
                    );

                    let outcome =
                        poll_until_idle(&ctx, &webset.id, "resolve_lenses", (idx as u32, total_steps), &opts)
                            .await?;
                    if outcome.cancelled {
                        helpers::cancel_owned_websets(&ctx, &owned_ids).await;
                        return Ok(None);
                    }
                    timed_out |= outcome.timed_out;
                    resolved.push(ResolvedLens {
                        lens_id: lens.id.clone(),
                        webset_id: webset.id,
                    });
                }
            }
        }
    }

    steps.begin("evaluate_lenses");
    let now = Utc::now();
    let mut lens_results: Vec<LensResult> = Vec::with_capacity(resolved.len());

    for (idx, entry) in resolved.iter().enumerate() {
        if helpers::is_cancelled(&ctx) {
            helpers::cancel_owned_websets(&ctx, &owned_ids).await;
            return Ok(None);
        }
        ctx.store.update_progress(
            &ctx.task_id,
            TaskProgress::at_step("evaluate_lenses", idx as u32, total_steps)
                .with_message(format!("lens {}", entry.lens_id)),
        );

        let webset = ctx
            .client
            .get_webset(&entry.webset_id)
            .await
            .map_err(|e| WorkflowError::upstream("evaluate_lenses", &e))?;
        let descriptions = enrichment_descriptions(&webset);

        let cap = cron
            .lenses
            .iter()
            .find(|l| l.id == entry.lens_id)
            .and_then(|l| l.search.as_ref())
            .and_then(|s| s.count)
            .map(|count| (count * 2) as usize)
            .unwrap_or(BOUND_LENS_CAP);
        let items = collect_items(&ctx, &entry.webset_id, cap, "evaluate_lenses").await?;

        let lens_shapes: Vec<_> = cron
            .shapes
            .iter()
            .filter(|s| s.lens_id == entry.lens_id)
            .collect();

        let shaped: Vec<ShapedItem> = items
            .iter()
            .filter_map(|item| {
                let bag = shape::resolve_enrichments(item, &descriptions);
                if !shape::item_is_shaped(item, &lens_shapes, &bag, now) {
                    return None;
                }
                Some(ShapedItem {
                    id: item.id.clone(),
                    name: entity_name(&item.properties),
                    url: item.url().map(|u| u.to_string()),
                    enrichments: bag,
                    created_at: item.created_at,
                })
            })
            .collect();

        lens_results.push(LensResult {
            lens_id: entry.lens_id.clone(),
            webset_id: entry.webset_id.clone(),
            total_items: items.len(),
            shaped,
        });
    }

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, &owned_ids).await;
        return Ok(None);
    }

    steps.begin("join");
    let join_outcome = join::join(&join_rule, &lens_results);

    steps.begin("signal");
    let declared: Vec<String> = cron.lenses.iter().map(|l| l.id.clone()).collect();
    let signal_outcome =
        signal::evaluate(&signal_rule.requires, join_rule.by, &join_outcome, &declared);

    steps.begin("snapshot");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("snapshot", total_steps - 1, total_steps),
    );
    let snap = build_snapshot(
        now,
        &cron,
        join_rule.by,
        &lens_results,
        &join_outcome,
        &signal_outcome,
    );
    let delta = previous.as_ref().map(|prev| compute_delta(prev, &snap));

    // Monitors only attach on initial runs, and only once evaluation has
    // succeeded. Failures are dropped.
    if !reevaluation {
        if let Some(monitor) = &cron.monitor {
            steps.begin("monitors");
            for entry in &resolved {
                let result = ctx
                    .client
                    .create_monitor(CreateMonitorParams {
                        webset_id: entry.webset_id.clone(),
                        cadence: MonitorCadence {
                            cron: monitor.cron.clone(),
                            timezone: monitor
                                .timezone
                                .clone()
                                .unwrap_or_else(|| "Etc/UTC".to_string()),
                        },
                    })
                    .await;
                if let Err(e) = result {
                    debug!(webset_id = %entry.webset_id, error = %e, "monitor registration dropped");
                }
            }
        }
    }

    let webset_ids: serde_json::Map<String, serde_json::Value> = resolved
        .iter()
        .map(|entry| (entry.lens_id.clone(), json!(entry.webset_id)))
        .collect();

    let mut result = json!({
        "name": cron.name,
        "snapshot": snap,
        "websetIds": webset_ids,
        "delta": delta,
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}
