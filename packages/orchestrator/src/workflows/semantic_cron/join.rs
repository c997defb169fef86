//! Cross-lens join engine: folds per-lens shaped items into joined entities
//! (entity modes) or a lens-evidence set (temporal / cooccurrence modes).

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::config::{JoinBy, JoinRule};
use super::shape::EnrichmentBag;
use crate::common::similarity::dice_coefficient;

/// One shaped item carrying projected identity, description-indexed
/// enrichment values, and its creation timestamp.
#[derive(Debug, Clone)]
pub struct ShapedItem {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub enrichments: EnrichmentBag,
    pub created_at: Option<DateTime<Utc>>,
}

/// Everything one lens contributed to an evaluation.
#[derive(Debug, Clone)]
pub struct LensResult {
    pub lens_id: String,
    pub webset_id: String,
    pub total_items: usize,
    pub shaped: Vec<ShapedItem>,
}

/// An entity folded across lenses.
#[derive(Debug, Clone)]
pub struct JoinedEntity {
    pub name: String,
    pub url: Option<String>,
    pub present_in: BTreeSet<String>,
    /// (lens id, item creation time) per sighting that carried a timestamp.
    pub sightings: Vec<(String, DateTime<Utc>)>,
    /// Per-lens enrichment snapshot.
    pub per_lens: HashMap<String, EnrichmentBag>,
}

impl JoinedEntity {
    /// Canonical identity key; URL preferred over name.
    pub fn key(&self) -> String {
        self.url.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub entities: Vec<JoinedEntity>,
    pub lenses_with_evidence: BTreeSet<String>,
}

/// Run the configured join over lens results, in lens declaration order.
pub fn join(rule: &JoinRule, lenses: &[LensResult]) -> JoinOutcome {
    match rule.by {
        JoinBy::Entity => entity_join(rule, lenses, false),
        JoinBy::EntityTemporal => entity_join(rule, lenses, true),
        JoinBy::Temporal => temporal_join(rule, lenses),
        JoinBy::Cooccurrence => cooccurrence_join(rule, lenses),
    }
}

fn entity_join(rule: &JoinRule, lenses: &[LensResult], require_temporal: bool) -> JoinOutcome {
    let mut entities: Vec<JoinedEntity> = Vec::new();

    for lens in lenses {
        for item in &lens.shaped {
            let matched = entities.iter_mut().find(|entity| {
                if let (Some(a), Some(b)) = (&entity.url, &item.url) {
                    if a == b {
                        return true;
                    }
                }
                dice_coefficient(&entity.name, &item.name) >= rule.name_threshold
            });

            let entity = match matched {
                Some(entity) => entity,
                None => {
                    entities.push(JoinedEntity {
                        name: item.name.clone(),
                        url: item.url.clone(),
                        present_in: BTreeSet::new(),
                        sightings: Vec::new(),
                        per_lens: HashMap::new(),
                    });
                    let last = entities.len() - 1;
                    &mut entities[last]
                }
            };

            entity.present_in.insert(lens.lens_id.clone());
            if entity.url.is_none() {
                entity.url = item.url.clone();
            }
            if let Some(created_at) = item.created_at {
                entity.sightings.push((lens.lens_id.clone(), created_at));
            }
            entity
                .per_lens
                .entry(lens.lens_id.clone())
                .or_default()
                .extend(item.enrichments.clone());
        }
    }

    entities.retain(|entity| entity.present_in.len() >= rule.min_lens_overlap);

    if require_temporal {
        let window_ms = rule.temporal.map(|t| t.window_ms()).unwrap_or(i64::MAX);
        entities.retain(|entity| has_cross_lens_pair(&entity.sightings, window_ms));
    }

    let lenses_with_evidence = entities
        .iter()
        .flat_map(|e| e.present_in.iter().cloned())
        .collect();

    JoinOutcome {
        entities,
        lenses_with_evidence,
    }
}

/// Two timestamps from distinct lenses within the window.
fn has_cross_lens_pair(sightings: &[(String, DateTime<Utc>)], window_ms: i64) -> bool {
    for (i, (lens_a, time_a)) in sightings.iter().enumerate() {
        for (lens_b, time_b) in &sightings[i + 1..] {
            if lens_a != lens_b && (*time_a - *time_b).num_milliseconds().abs() <= window_ms {
                return true;
            }
        }
    }
    false
}

/// No entity identity: a lens pair counts as evidence when any of their item
/// timestamps land within the window of each other.
fn temporal_join(rule: &JoinRule, lenses: &[LensResult]) -> JoinOutcome {
    let window_ms = rule.temporal.map(|t| t.window_ms()).unwrap_or(i64::MAX);
    let mut evidence: BTreeSet<String> = BTreeSet::new();

    for (i, lens_a) in lenses.iter().enumerate() {
        for lens_b in &lenses[i + 1..] {
            let close = lens_a.shaped.iter().any(|a| {
                let Some(time_a) = a.created_at else {
                    return false;
                };
                lens_b.shaped.iter().any(|b| {
                    b.created_at
                        .map(|time_b| (time_a - time_b).num_milliseconds().abs() <= window_ms)
                        .unwrap_or(false)
                })
            });
            if close {
                evidence.insert(lens_a.lens_id.clone());
                evidence.insert(lens_b.lens_id.clone());
            }
        }
    }

    JoinOutcome {
        entities: Vec::new(),
        lenses_with_evidence: evidence,
    }
}

/// Evidence is any lens with shaped items; a temporal window additionally
/// anchors lenses to the earliest timestamp observed anywhere.
fn cooccurrence_join(rule: &JoinRule, lenses: &[LensResult]) -> JoinOutcome {
    let mut evidence: BTreeSet<String> = lenses
        .iter()
        .filter(|lens| !lens.shaped.is_empty())
        .map(|lens| lens.lens_id.clone())
        .collect();

    if let Some(temporal) = rule.temporal {
        let earliest = lenses
            .iter()
            .flat_map(|lens| lens.shaped.iter().filter_map(|item| item.created_at))
            .min();
        if let Some(anchor) = earliest {
            let window_ms = temporal.window_ms();
            evidence.retain(|lens_id| {
                lenses
                    .iter()
                    .find(|lens| &lens.lens_id == lens_id)
                    .map(|lens| {
                        lens.shaped.iter().any(|item| {
                            item.created_at
                                .map(|t| (t - anchor).num_milliseconds().abs() <= window_ms)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            });
        }
    }

    JoinOutcome {
        entities: Vec::new(),
        lenses_with_evidence: evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::semantic_cron::config::TemporalWindow;

    fn item(name: &str, url: Option<&str>, days_ago: i64) -> ShapedItem {
        ShapedItem {
            id: format!("item_{name}"),
            name: name.to_string(),
            url: url.map(|u| u.to_string()),
            enrichments: EnrichmentBag::new(),
            created_at: Some(Utc::now() - chrono::Duration::days(days_ago)),
        }
    }

    fn lens(id: &str, shaped: Vec<ShapedItem>) -> LensResult {
        LensResult {
            lens_id: id.to_string(),
            webset_id: format!("ws_{id}"),
            total_items: shaped.len(),
            shaped,
        }
    }

    fn rule(by: JoinBy, min_overlap: usize, days: Option<f64>) -> JoinRule {
        JoinRule {
            by,
            name_threshold: 0.85,
            min_lens_overlap: min_overlap,
            temporal: days.map(|days| TemporalWindow { days }),
        }
    }

    #[test]
    fn entity_join_folds_by_url_and_enforces_overlap() {
        let outcome = join(
            &rule(JoinBy::Entity, 2, None),
            &[
                lens("A", vec![item("Acme", Some("https://acme.test"), 0), item("Solo", None, 0)]),
                lens("B", vec![item("Acme Corp", Some("https://acme.test"), 1)]),
            ],
        );
        assert_eq!(outcome.entities.len(), 1);
        let entity = &outcome.entities[0];
        assert_eq!(entity.present_in.len(), 2);
        assert_eq!(entity.key(), "https://acme.test");
    }

    #[test]
    fn entity_join_matches_fuzzy_names_without_urls() {
        let outcome = join(
            &rule(JoinBy::Entity, 2, None),
            &[
                lens("A", vec![item("Acme Robotics Inc", None, 0)]),
                lens("B", vec![item("Acme Robotics, Inc.", None, 0)]),
            ],
        );
        assert_eq!(outcome.entities.len(), 1);
    }

    #[test]
    fn min_overlap_filters_single_lens_entities() {
        let outcome = join(
            &rule(JoinBy::Entity, 2, None),
            &[
                lens("A", vec![item("Acme", Some("https://acme.test"), 0)]),
                lens("B", vec![item("Initech", Some("https://initech.test"), 0)]),
            ],
        );
        assert!(outcome.entities.is_empty());
    }

    #[test]
    fn entity_temporal_requires_cross_lens_timestamps_in_window() {
        let close = join(
            &rule(JoinBy::EntityTemporal, 2, Some(7.0)),
            &[
                lens("A", vec![item("Acme", Some("https://acme.test"), 0)]),
                lens("B", vec![item("Acme", Some("https://acme.test"), 3)]),
            ],
        );
        assert_eq!(close.entities.len(), 1);

        let far = join(
            &rule(JoinBy::EntityTemporal, 2, Some(7.0)),
            &[
                lens("A", vec![item("Acme", Some("https://acme.test"), 0)]),
                lens("B", vec![item("Acme", Some("https://acme.test"), 30)]),
            ],
        );
        assert!(far.entities.is_empty());
    }

    #[test]
    fn single_lens_entity_cannot_pass_entity_temporal() {
        let outcome = join(
            &rule(JoinBy::EntityTemporal, 1, Some(7.0)),
            &[lens("A", vec![item("Acme", Some("https://acme.test"), 0)])],
        );
        assert!(outcome.entities.is_empty());
    }

    #[test]
    fn temporal_join_reports_pairwise_evidence_without_entities() {
        let outcome = join(
            &rule(JoinBy::Temporal, 2, Some(7.0)),
            &[
                lens("A", vec![item("X", None, 0)]),
                lens("B", vec![item("Y", None, 2)]),
                lens("C", vec![item("Z", None, 60)]),
            ],
        );
        assert!(outcome.entities.is_empty());
        assert_eq!(
            outcome.lenses_with_evidence,
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn cooccurrence_counts_lenses_with_shaped_items() {
        let outcome = join(
            &rule(JoinBy::Cooccurrence, 2, None),
            &[
                lens("A", vec![item("X", None, 0)]),
                lens("B", vec![]),
                lens("C", vec![item("Z", None, 5)]),
            ],
        );
        assert_eq!(
            outcome.lenses_with_evidence,
            BTreeSet::from(["A".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn cooccurrence_window_anchors_to_earliest_timestamp() {
        let outcome = join(
            &rule(JoinBy::Cooccurrence, 2, Some(7.0)),
            &[
                lens("A", vec![item("X", None, 10)]), // earliest
                lens("B", vec![item("Y", None, 6)]),  // within 7d of earliest
                lens("C", vec![item("Z", None, 0)]),  // 10d after earliest
            ],
        );
        assert_eq!(
            outcome.lenses_with_evidence,
            BTreeSet::from(["A".to_string(), "B".to_string()])
        );
    }
}
