//! `convergent.search` — run the same intent as 2–5 parallel query phrasings
//! and find the entities the searches converge on.
//!
//! Deduplication is exact-URL first, then fuzzy name match via the Dice
//! bigram coefficient. Entities found by a single query land in that query's
//! `unique` bucket; entities confirmed by another search enter the
//! intersection with a confidence proportional to how many other searches
//! re-found them.

use std::collections::BTreeSet;

use futures::future::join_all;
use serde_json::{json, Map, Value};

use super::helpers::{
    self, collect_items, optional_f64, optional_u64, poll_until_idle, PollOptions, StepTracker,
};
use crate::common::similarity::dice_coefficient;
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::entity_name;

const TOTAL_STEPS: u32 = 4;
const DEFAULT_NAME_THRESHOLD: f64 = 0.85;

/// One deduplicated entity with the set of queries that produced it.
#[derive(Debug, Clone)]
pub struct MergedEntity {
    pub name: String,
    pub url: Option<String>,
    pub found_in: BTreeSet<usize>,
}

/// Fold per-query entity sightings into a deduplicated list.
///
/// Match order per sighting: exact URL, then Dice name similarity at or
/// above `threshold`. Unmatched sightings start new entries.
pub fn merge_entities(
    per_query: &[Vec<(String, Option<String>)>],
    threshold: f64,
) -> Vec<MergedEntity> {
    let mut merged: Vec<MergedEntity> = Vec::new();

    for (query_idx, sightings) in per_query.iter().enumerate() {
        for (name, url) in sightings {
            let existing = merged.iter_mut().find(|entity| {
                if let (Some(a), Some(b)) = (&entity.url, url) {
                    if a == b {
                        return true;
                    }
                }
                dice_coefficient(&entity.name, name) >= threshold
            });

            match existing {
                Some(entity) => {
                    entity.found_in.insert(query_idx);
                    if entity.url.is_none() {
                        entity.url = url.clone();
                    }
                }
                None => merged.push(MergedEntity {
                    name: name.clone(),
                    url: url.clone(),
                    found_in: BTreeSet::from([query_idx]),
                }),
            }
        }
    }

    merged
}

pub async fn run(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let queries: Vec<String> = ctx
        .args
        .get("queries")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|q| q.as_str())
                .map(|q| q.to_string())
                .collect()
        })
        .unwrap_or_default();
    if !(2..=5).contains(&queries.len()) {
        return Err(WorkflowError::validation(format!(
            "queries must contain 2 to 5 entries, got {}",
            queries.len()
        )));
    }
    let count = optional_u64(&ctx.args, "count", 10);
    let threshold = optional_f64(&ctx.args, "nameThreshold", DEFAULT_NAME_THRESHOLD);
    let opts = PollOptions::from_args(&ctx.args);

    steps.begin("create_websets");
    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("create_websets", 0, TOTAL_STEPS)
            .with_message(format!("{} parallel searches", queries.len())),
    );
    let creates = join_all(queries.iter().map(|query| {
        let params = helpers::webset_params(query, count, &ctx.args);
        let client = ctx.client.clone();
        async move { client.create_webset(params?).await.map_err(|e| WorkflowError::upstream("create_websets", &e)) }
    }))
    .await;

    let mut webset_ids = Vec::with_capacity(creates.len());
    let mut create_error = None;
    for result in creates {
        match result {
            Ok(webset) => webset_ids.push(webset.id),
            Err(e) => create_error = Some(e),
        }
    }
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"websetIds": webset_ids}));
    if let Some(e) = create_error {
        return Err(e);
    }

    if helpers::is_cancelled(&ctx) {
        helpers::cancel_owned_websets(&ctx, &webset_ids).await;
        return Ok(None);
    }

    steps.begin("poll");
    let polls = join_all(
        webset_ids
            .iter()
            .map(|id| poll_until_idle(&ctx, id, "poll", (1, TOTAL_STEPS), &opts)),
    )
    .await;
    let mut timed_out = false;
    for poll in polls {
        let outcome = poll?;
        if outcome.cancelled {
            return Ok(None);
        }
        timed_out |= outcome.timed_out;
    }

    steps.begin("collect");
    ctx.store
        .update_progress(&ctx.task_id, TaskProgress::at_step("collect", 2, TOTAL_STEPS));
    let cap = (count * 2) as usize;
    let mut per_query: Vec<Vec<(String, Option<String>)>> = Vec::with_capacity(webset_ids.len());
    for id in &webset_ids {
        if helpers::is_cancelled(&ctx) {
            helpers::cancel_owned_websets(&ctx, &webset_ids).await;
            return Ok(None);
        }
        let items = collect_items(&ctx, id, cap, "collect").await?;
        per_query.push(
            items
                .iter()
                .map(|item| {
                    (
                        entity_name(&item.properties),
                        item.url().map(|u| u.to_string()),
                    )
                })
                .collect(),
        );
    }

    steps.begin("deduplicate");
    let merged = merge_entities(&per_query, threshold);
    let total_queries = queries.len();

    let intersection: Vec<Value> = merged
        .iter()
        .filter(|e| e.found_in.len() >= 2)
        .map(|e| {
            // Confidence counts the searches that re-found the entity after
            // its first sighting, over the total number of searches.
            let confirmations = e.found_in.len() - 1;
            json!({
                "name": e.name,
                "url": e.url,
                "foundInCount": e.found_in.len(),
                "confidence": confirmations as f64 / total_queries as f64,
            })
        })
        .collect();

    let mut unique = Map::new();
    for (query_idx, query) in queries.iter().enumerate() {
        let bucket: Vec<Value> = merged
            .iter()
            .filter(|e| e.found_in.len() == 1 && e.found_in.contains(&query_idx))
            .map(|e| json!({"name": e.name, "url": e.url}))
            .collect();
        unique.insert(query.clone(), Value::Array(bucket));
    }

    let overlap_matrix: Vec<Vec<usize>> = (0..total_queries)
        .map(|i| {
            (0..total_queries)
                .map(|j| {
                    merged
                        .iter()
                        .filter(|e| e.found_in.contains(&i) && e.found_in.contains(&j))
                        .count()
                })
                .collect()
        })
        .collect();

    ctx.store.update_progress(
        &ctx.task_id,
        TaskProgress::at_step("deduplicate", TOTAL_STEPS, TOTAL_STEPS),
    );

    let mut result = json!({
        "queries": queries,
        "websetIds": webset_ids,
        "totalEntities": merged.len(),
        "intersection": intersection,
        "unique": unique,
        "overlapMatrix": overlap_matrix,
        "duration": started.elapsed().as_millis() as u64,
        "steps": steps.into_value(),
    });
    if timed_out {
        result["timedOut"] = json!(true);
    }
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sighting(name: &str, url: Option<&str>) -> (String, Option<String>) {
        (name.to_string(), url.map(|u| u.to_string()))
    }

    #[test]
    fn exact_url_match_wins_over_name() {
        let merged = merge_entities(
            &[
                vec![sighting("Acme Corporation", Some("https://acme.test"))],
                vec![sighting("Completely Different", Some("https://acme.test"))],
            ],
            0.85,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].found_in.len(), 2);
    }

    #[test]
    fn fuzzy_name_match_folds_near_duplicates() {
        let merged = merge_entities(
            &[
                vec![sighting("Acme Robotics Inc", None)],
                vec![sighting("Acme Robotics, Inc.", None)],
            ],
            0.85,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn unrelated_entities_stay_separate() {
        let merged = merge_entities(
            &[
                vec![sighting("Acme", Some("https://a.test"))],
                vec![sighting("Initech", Some("https://b.test"))],
            ],
            0.85,
        );
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().all(|e| e.found_in.len() == 1));
    }

    #[test]
    fn url_backfills_on_merge() {
        let merged = merge_entities(
            &[
                vec![sighting("Acme Corporation", None)],
                vec![sighting("Acme Corporation", Some("https://acme.test"))],
            ],
            0.85,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].url.as_deref(), Some("https://acme.test"));
    }
}
