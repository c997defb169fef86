//! `qd.winnow` — quality-diversity winnowing over a webset.
//!
//! Search criteria define behavioral dimensions: each item's evaluations
//! become a boolean vector whose encoding is its *niche*. Enrichments define
//! fitness. Selection keeps the best item per niche (`diverse`) or filters
//! by criteria coverage (`all-criteria` / `any-criteria`), and the returned
//! metrics diagnose how well the criteria discriminate.

use std::collections::HashMap;

use serde_json::{json, Value};
use websets_client::{
    EnrichmentFormat, EnrichmentResult, EnrichmentResultStatus, Satisfied, Webset, WebsetItem,
};

use super::helpers::{
    self, collect_items, optional_str, optional_u64, poll_until_idle, PollOptions, StepTracker,
};
use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError, WorkflowResult};
use crate::projections::{enrichment_descriptions, project_item};

const MAX_ROUNDS: u64 = 10;

// ============================================================================
// Classification
// ============================================================================

/// Boolean criteria vector for one item. Position *i* is true iff the
/// evaluation for criterion *i* is satisfied; missing evaluations are false.
pub fn criteria_vector(item: &WebsetItem, criteria: &[String]) -> Vec<bool> {
    criteria
        .iter()
        .map(|criterion| {
            item.evaluations
                .iter()
                .find(|e| &e.criterion == criterion)
                .map(|e| e.satisfied == Satisfied::Yes)
                .unwrap_or(false)
        })
        .collect()
}

/// Encode a criteria vector as the niche key, e.g. `"1,0,1"`.
pub fn niche_key(vector: &[bool]) -> String {
    vector
        .iter()
        .map(|bit| if *bit { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Fitness
// ============================================================================

fn sub_score(result: &EnrichmentResult) -> f64 {
    match result.format {
        EnrichmentFormat::Number => result
            .first_value()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0),
        EnrichmentFormat::Options
        | EnrichmentFormat::Text
        | EnrichmentFormat::Date
        | EnrichmentFormat::Email
        | EnrichmentFormat::Phone
        | EnrichmentFormat::Url => {
            if result.first_value().is_some() {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Arithmetic mean of completed-enrichment sub-scores; 0 with none completed.
pub fn fitness(item: &WebsetItem) -> f64 {
    let completed: Vec<f64> = item
        .enrichments
        .iter()
        .filter(|e| e.status == EnrichmentResultStatus::Completed)
        .map(sub_score)
        .collect();
    if completed.is_empty() {
        return 0.0;
    }
    completed.iter().sum::<f64>() / completed.len() as f64
}

// ============================================================================
// Selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Diverse,
    AllCriteria,
    AnyCriteria,
}

impl SelectionStrategy {
    pub fn parse(raw: &str) -> Result<Self, WorkflowError> {
        match raw {
            "diverse" => Ok(Self::Diverse),
            "all-criteria" => Ok(Self::AllCriteria),
            "any-criteria" => Ok(Self::AnyCriteria),
            other => Err(WorkflowError::validation(format!(
                "unknown selection strategy: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diverse => "diverse",
            Self::AllCriteria => "all-criteria",
            Self::AnyCriteria => "any-criteria",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classified {
    pub index: usize,
    pub vector: Vec<bool>,
    pub niche: String,
    pub fitness: f64,
}

pub fn classify(items: &[WebsetItem], criteria: &[String]) -> Vec<Classified> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let vector = criteria_vector(item, criteria);
            Classified {
                index,
                niche: niche_key(&vector),
                vector,
                fitness: fitness(item),
            }
        })
        .collect()
}

/// Apply a selection strategy; every strategy orders by fitness descending.
pub fn select_elites(classified: &[Classified], strategy: SelectionStrategy) -> Vec<Classified> {
    let mut selected: Vec<Classified> = match strategy {
        SelectionStrategy::Diverse => {
            let mut best_per_niche: HashMap<&str, &Classified> = HashMap::new();
            for entry in classified {
                best_per_niche
                    .entry(entry.niche.as_str())
                    .and_modify(|best| {
                        if entry.fitness > best.fitness {
                            *best = entry;
                        }
                    })
                    .or_insert(entry);
            }
            best_per_niche.into_values().cloned().collect()
        }
        SelectionStrategy::AllCriteria => classified
            .iter()
            .filter(|c| !c.vector.is_empty() && c.vector.iter().all(|b| *b))
            .cloned()
            .collect(),
        SelectionStrategy::AnyCriteria => classified
            .iter()
            .filter(|c| c.vector.iter().any(|b| *b))
            .cloned()
            .collect(),
    };
    selected.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
    selected
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone)]
pub struct QualityMetrics {
    pub coverage: f64,
    pub avg_fitness: f64,
    pub diversity: f64,
    pub stringency: f64,
}

/// Coverage, mean elite fitness, normalized niche entropy, and the upstream
/// found/analyzed ratio.
pub fn quality_metrics(
    classified: &[Classified],
    elites: &[Classified],
    criteria_count: usize,
    webset: &Webset,
) -> QualityMetrics {
    let niche_space = 2f64.powi(criteria_count as i32);

    let mut niche_counts: HashMap<&str, usize> = HashMap::new();
    for entry in classified {
        *niche_counts.entry(entry.niche.as_str()).or_insert(0) += 1;
    }
    let coverage = niche_counts.len() as f64 / niche_space;

    let avg_fitness = if elites.is_empty() {
        0.0
    } else {
        elites.iter().map(|e| e.fitness).sum::<f64>() / elites.len() as f64
    };

    let diversity = if classified.is_empty() {
        0.0
    } else if criteria_count == 0 {
        // One niche exists and it is trivially uniform.
        1.0
    } else {
        let total = classified.len() as f64;
        let entropy: f64 = niche_counts
            .values()
            .map(|count| {
                let p = *count as f64 / total;
                -p * p.log2()
            })
            .sum();
        entropy / niche_space.log2()
    };

    let (found, analyzed) = webset
        .searches
        .iter()
        .filter_map(|s| s.progress.as_ref())
        .fold((0u64, 0u64), |(f, a), p| (f + p.found, a + p.analyzed));
    let stringency = if analyzed == 0 {
        0.0
    } else {
        found as f64 / analyzed as f64
    };

    QualityMetrics {
        coverage,
        avg_fitness,
        diversity,
        stringency,
    }
}

/// Per-criterion quality labels from live success rates.
pub fn descriptor_feedback(webset: &Webset) -> Vec<Value> {
    webset
        .latest_search()
        .map(|search| {
            search
                .criteria
                .iter()
                .map(|criterion| {
                    let label = match criterion.success_rate {
                        Some(rate) if rate < 5.0 => "too-strict",
                        Some(rate) if rate > 95.0 => "not-discriminating",
                        _ => "good-discriminator",
                    };
                    json!({
                        "criterion": criterion.description,
                        "successRate": criterion.success_rate,
                        "label": label,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Workflow
// ============================================================================

pub async fn run(ctx: WorkflowCtx) -> WorkflowResult {
    let started = std::time::Instant::now();
    let mut steps = StepTracker::new();

    steps.begin("validate");
    let bound_webset_id = optional_str(&ctx.args, "websetId");
    let count = optional_u64(&ctx.args, "count", 25);
    let rounds = optional_u64(&ctx.args, "rounds", 1).clamp(1, MAX_ROUNDS);
    let strategy = SelectionStrategy::parse(
        &optional_str(&ctx.args, "selection").unwrap_or_else(|| "diverse".to_string()),
    )?;
    let mut opts = PollOptions::from_args(&ctx.args);
    // A bound webset is not ours to cancel upstream.
    opts.cancel_webset_on_abort = bound_webset_id.is_none();

    steps.begin("resolve_webset");
    let (webset_id, owned) = match bound_webset_id {
        Some(id) => (id, false),
        None => {
            let query = helpers::require_str(&ctx.args, "query")?;
            let params = helpers::webset_params(&query, count, &ctx.args)?;
            let webset = ctx
                .client
                .create_webset(params)
                .await
                .map_err(|e| WorkflowError::upstream("create_webset", &e))?;
            (webset.id, true)
        }
    };
    ctx.store
        .set_partial_result(&ctx.task_id, json!({"websetId": webset_id}));

    if helpers::is_cancelled(&ctx) {
        if owned {
            helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&webset_id)).await;
        }
        return Ok(None);
    }

    let mut timed_out = false;
    let mut history: Vec<Value> = Vec::new();
    let mut final_round: Option<(Webset, Vec<WebsetItem>, Vec<Classified>, Vec<Classified>)> = None;

    for round in 1..=rounds {
        steps.begin(format!("round_{round}"));
        ctx.store.update_progress(
            &ctx.task_id,
            TaskProgress::at_step("evaluate", round as u32, rounds as u32)
                .with_message(format!("round {round} of {rounds}")),
        );

        let outcome = poll_until_idle(&ctx, &webset_id, "poll", (round as u32, rounds as u32), &opts)
            .await?;
        if outcome.cancelled {
            return Ok(None);
        }
        timed_out |= outcome.timed_out;
        let webset = outcome.webset;

        let items = collect_items(&ctx, &webset_id, (count * 2) as usize, "collect").await?;
        let criteria: Vec<String> = webset
            .latest_search()
            .map(|s| s.criteria.iter().map(|c| c.description.clone()).collect())
            .unwrap_or_default();

        let classified = classify(&items, &criteria);
        let elites = select_elites(&classified, strategy);
        let metrics = quality_metrics(&classified, &elites, criteria.len(), &webset);

        history.push(json!({
            "round": round,
            "itemCount": items.len(),
            "eliteCount": elites.len(),
            "coverage": metrics.coverage,
            "avgFitness": metrics.avg_fitness,
            "diversity": metrics.diversity,
        }));
        final_round = Some((webset, items, classified, elites));

        if round < rounds {
            if helpers::is_cancelled(&ctx) {
                if owned {
                    helpers::cancel_owned_websets(&ctx, std::slice::from_ref(&webset_id)).await;
                }
                return Ok(None);
            }
            tokio::time::sleep(opts.interval).await;
        }
    }

    let Some((webset, items, classified, elites)) = final_round else {
        return Err(WorkflowError::internal("evaluate", "no evaluation rounds ran"));
    };

    steps.begin("finalize");
    let criteria: Vec<String> = webset
        .latest_search()
        .map(|s| s.criteria.iter().map(|c| c.description.clone()).collect())
        .unwrap_or_default();
    let metrics = quality_metrics(&classified, &elites, criteria.len(), &webset);
    let enrich_map = enrichment_descriptions(&webset);

    let elite_values: Vec<Value> = elites
        .iter()
        .filter_map(|e| {
            let item = items.get(e.index)?;
            let projected = serde_json::to_value(item).ok()?;
            Some(json!({
                "item": project_item(&projected, &enrich_map),
                "niche": e.niche,
                "fitness": e.fitness,
            }))
        })
        .collect();

    let mut result = json!({
        "websetId": webset_id,
        "criteria": criteria,
        "selection": strategy.as_str(),
        "elites": elite_values,
        "metrics": {
            "coverage": metrics.coverage,
            "avgFitness": metrics.avg_fitness,
            "diversity": metrics.diversity,
            "stringency": metrics.stringency,
        },
        "descriptorFeedback": descriptor_feedback(&webset),
        "rounds": history,
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
    use crate::workflows::helpers::testing::{company_item, with_enrichment, with_evaluations};

    fn scored_item(id: &str, verdicts: &[(&str, bool)], score: f64) -> WebsetItem {
        let item = company_item(id, &format!("Co {id}"), &format!("https://{id}.test"));
        let item = with_evaluations(item, verdicts);
        with_enrichment(
            item,
            "en_fitness",
            EnrichmentFormat::Number,
            &[&score.to_string()],
        )
    }

    fn criteria() -> Vec<String> {
        vec!["funded".to_string(), "hiring".to_string()]
    }

    #[test]
    fn niche_vector_length_matches_criteria_and_is_binary() {
        let item = scored_item("a", &[("funded", true)], 1.0);
        let vector = criteria_vector(&item, &criteria());
        assert_eq!(vector.len(), 2);
        let key = niche_key(&vector);
        assert!(key.split(',').all(|c| c == "0" || c == "1"));
        assert_eq!(key, "1,0");
    }

    #[test]
    fn missing_evaluation_contributes_false() {
        let item = scored_item("a", &[], 1.0);
        assert_eq!(niche_key(&criteria_vector(&item, &criteria())), "0,0");
    }

    #[test]
    fn number_fitness_parses_first_result() {
        let item = scored_item("a", &[], 7.5);
        assert_eq!(fitness(&item), 7.5);
    }

    #[test]
    fn unparseable_number_scores_zero() {
        let item = with_enrichment(
            company_item("a", "A", "https://a.test"),
            "en",
            EnrichmentFormat::Number,
            &["not a number"],
        );
        assert_eq!(fitness(&item), 0.0);
    }

    #[test]
    fn pending_enrichments_are_ignored_by_the_mean() {
        let mut item = with_enrichment(
            company_item("a", "A", "https://a.test"),
            "en1",
            EnrichmentFormat::Number,
            &["4"],
        );
        item.enrichments.push(
            serde_json::from_value(serde_json::json!({
                "enrichmentId": "en2",
                "status": "pending",
                "format": "text",
                "result": null,
            }))
            .unwrap(),
        );
        assert_eq!(fitness(&item), 4.0);
    }

    #[test]
    fn item_without_enrichments_scores_zero() {
        assert_eq!(fitness(&company_item("a", "A", "https://a.test")), 0.0);
    }

    #[test]
    fn diverse_selection_keeps_best_per_niche() {
        // S2 shape: [1,1]@5, [1,0]@8, [1,0]@12, [0,1]@3.
        let items = vec![
            scored_item("a", &[("funded", true), ("hiring", true)], 5.0),
            scored_item("b", &[("funded", true), ("hiring", false)], 8.0),
            scored_item("c", &[("funded", true), ("hiring", false)], 12.0),
            scored_item("d", &[("funded", false), ("hiring", true)], 3.0),
        ];
        let classified = classify(&items, &criteria());
        let elites = select_elites(&classified, SelectionStrategy::Diverse);

        assert_eq!(elites.len(), 3);
        let winner = elites.iter().find(|e| e.niche == "1,0").unwrap();
        assert_eq!(winner.fitness, 12.0);
        // Ordered by fitness descending.
        assert!(elites.windows(2).all(|w| w[0].fitness >= w[1].fitness));
    }

    #[test]
    fn coverage_counts_populated_niches() {
        let items = vec![
            scored_item("a", &[("funded", true), ("hiring", true)], 5.0),
            scored_item("b", &[("funded", true), ("hiring", false)], 8.0),
            scored_item("d", &[("funded", false), ("hiring", true)], 3.0),
        ];
        let classified = classify(&items, &criteria());
        let elites = select_elites(&classified, SelectionStrategy::Diverse);
        let webset = crate::workflows::helpers::testing::idle_webset("ws_x");
        let metrics = quality_metrics(&classified, &elites, 2, &webset);
        assert_eq!(metrics.coverage, 0.75);
    }

    #[test]
    fn diversity_is_one_iff_uniform_over_all_niches() {
        let items = vec![
            scored_item("a", &[("funded", false), ("hiring", false)], 1.0),
            scored_item("b", &[("funded", false), ("hiring", true)], 1.0),
            scored_item("c", &[("funded", true), ("hiring", false)], 1.0),
            scored_item("d", &[("funded", true), ("hiring", true)], 1.0),
        ];
        let classified = classify(&items, &criteria());
        let webset = crate::workflows::helpers::testing::idle_webset("ws_x");
        let uniform = quality_metrics(&classified, &[], 2, &webset);
        assert!((uniform.diversity - 1.0).abs() < 1e-9);

        let skewed = classify(&items[..2].to_vec(), &criteria());
        let partial = quality_metrics(&skewed, &[], 2, &webset);
        assert!(partial.diversity < 1.0);
        assert!(partial.diversity > 0.0);
    }

    #[test]
    fn all_criteria_keeps_only_full_vectors() {
        let items = vec![
            scored_item("a", &[("funded", true), ("hiring", true)], 5.0),
            scored_item("b", &[("funded", true), ("hiring", false)], 8.0),
        ];
        let classified = classify(&items, &criteria());
        let elites = select_elites(&classified, SelectionStrategy::AllCriteria);
        assert_eq!(elites.len(), 1);
        assert_eq!(elites[0].niche, "1,1");
    }

    #[test]
    fn any_criteria_drops_the_zero_vector() {
        let items = vec![
            scored_item("a", &[("funded", false), ("hiring", false)], 5.0),
            scored_item("b", &[("funded", true), ("hiring", false)], 8.0),
        ];
        let classified = classify(&items, &criteria());
        let elites = select_elites(&classified, SelectionStrategy::AnyCriteria);
        assert_eq!(elites.len(), 1);
        assert_eq!(elites[0].niche, "1,0");
    }

    #[test]
    fn feedback_labels_follow_success_rate_bands() {
        let webset: Webset = serde_json::from_value(serde_json::json!({
            "id": "ws_x",
            "status": "idle",
            "searches": [{
                "id": "s1",
                "query": "q",
                "criteria": [
                    {"description": "rare", "successRate": 2.0},
                    {"description": "everything", "successRate": 99.0},
                    {"description": "useful", "successRate": 40.0},
                ],
            }],
        }))
        .unwrap();
        let feedback = descriptor_feedback(&webset);
        assert_eq!(feedback[0]["label"], "too-strict");
        assert_eq!(feedback[1]["label"], "not-discriminating");
        assert_eq!(feedback[2]["label"], "good-discriminator");
    }
}
