//! Snapshot assembly and delta computation.
//!
//! A snapshot is the durable external state of a semantic cron: the system
//! never stores one, callers pass the previous snapshot back to get deltas.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{CronConfig, JoinBy, SignalKind};
use super::join::{JoinOutcome, LensResult};
use super::shape::shape_label;
use super::signal::SignalOutcome;
use crate::common::duration::humanize_ms;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensSummary {
    pub webset_id: String,
    pub total_items: usize,
    pub shaped_count: usize,
    pub shapes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    pub present_in_lenses: Vec<String>,
    /// Per-lens enrichment values, keyed lens id → description → results.
    #[serde(default)]
    pub enrichments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl EntitySnapshot {
    /// Canonical identity key; URL preferred over name.
    pub fn key(&self) -> String {
        self.url.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSnapshot {
    pub by: JoinBy,
    pub entities: Vec<EntitySnapshot>,
    pub lenses_with_evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSnapshot {
    pub fired: bool,
    pub rule_type: SignalKind,
    pub satisfied_by: Vec<String>,
    #[serde(default)]
    pub matched_combination: Option<Vec<String>>,
    pub entities: Vec<String>,
}

/// Self-contained record of one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub evaluated_at: DateTime<Utc>,
    pub lenses: BTreeMap<String, LensSummary>,
    pub join: JoinSnapshot,
    pub signal: SignalSnapshot,
}

/// Assemble the snapshot for one completed evaluation.
pub fn build_snapshot(
    evaluated_at: DateTime<Utc>,
    config: &CronConfig,
    join_by: JoinBy,
    lens_results: &[LensResult],
    join_outcome: &JoinOutcome,
    signal_outcome: &SignalOutcome,
) -> Snapshot {
    let lenses = lens_results
        .iter()
        .map(|lens| {
            let shapes = config
                .shapes
                .iter()
                .filter(|s| s.lens_id == lens.lens_id)
                .map(shape_label)
                .collect();
            (
                lens.lens_id.clone(),
                LensSummary {
                    webset_id: lens.webset_id.clone(),
                    total_items: lens.total_items,
                    shaped_count: lens.shaped.len(),
                    shapes,
                },
            )
        })
        .collect();

    let entities = join_outcome
        .entities
        .iter()
        .map(|entity| EntitySnapshot {
            name: entity.name.clone(),
            url: entity.url.clone(),
            present_in_lenses: entity.present_in.iter().cloned().collect(),
            enrichments: entity
                .per_lens
                .iter()
                .map(|(lens, bag)| {
                    (
                        lens.clone(),
                        bag.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    )
                })
                .collect(),
        })
        .collect();

    Snapshot {
        evaluated_at,
        lenses,
        join: JoinSnapshot {
            by: join_by,
            entities,
            lenses_with_evidence: join_outcome.lenses_with_evidence.iter().cloned().collect(),
        },
        signal: SignalSnapshot {
            fired: signal_outcome.fired,
            rule_type: signal_outcome.rule_type,
            satisfied_by: signal_outcome.satisfied_by.clone(),
            matched_combination: signal_outcome.matched_combination.clone(),
            entities: signal_outcome.entities.clone(),
        },
    }
}

// ============================================================================
// Delta
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensDelta {
    pub new_shaped_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalTransition {
    pub was: bool,
    pub now: bool,
    pub changed: bool,
    pub new_entities: Vec<String>,
    pub lost_entities: Vec<String>,
}

/// Structured difference between two snapshots of the same configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub per_lens: BTreeMap<String, LensDelta>,
    pub new_joins: Vec<String>,
    pub lost_joins: Vec<String>,
    pub signal_transition: SignalTransition,
    pub time_since_last_eval: String,
}

/// Compare a previous snapshot against the current one.
pub fn compute_delta(previous: &Snapshot, current: &Snapshot) -> Delta {
    let per_lens = current
        .lenses
        .iter()
        .map(|(lens_id, summary)| {
            let previous_count = previous
                .lenses
                .get(lens_id)
                .map(|l| l.shaped_count)
                .unwrap_or(0);
            (
                lens_id.clone(),
                LensDelta {
                    new_shaped_items: summary.shaped_count.saturating_sub(previous_count),
                },
            )
        })
        .collect();

    let previous_keys: BTreeSet<String> =
        previous.join.entities.iter().map(|e| e.key()).collect();
    let current_keys: BTreeSet<String> = current.join.entities.iter().map(|e| e.key()).collect();
    let new_joins = current_keys.difference(&previous_keys).cloned().collect();
    let lost_joins = previous_keys.difference(&current_keys).cloned().collect();

    let previous_entities: BTreeSet<&String> = previous.signal.entities.iter().collect();
    let current_entities: BTreeSet<&String> = current.signal.entities.iter().collect();
    let new_entities = current_entities
        .difference(&previous_entities)
        .map(|s| s.to_string())
        .collect();
    let lost_entities = previous_entities
        .difference(&current_entities)
        .map(|s| s.to_string())
        .collect();

    let signal_transition = SignalTransition {
        was: previous.signal.fired,
        now: current.signal.fired,
        changed: previous.signal.fired != current.signal.fired,
        new_entities,
        lost_entities,
    };

    let elapsed_ms = (current.evaluated_at - previous.evaluated_at).num_milliseconds();
    Delta {
        per_lens,
        new_joins,
        lost_joins,
        signal_transition,
        time_since_last_eval: humanize_ms(elapsed_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(
        evaluated_at: DateTime<Utc>,
        shaped: usize,
        entities: &[(&str, Option<&str>)],
        fired: bool,
        signal_entities: &[&str],
    ) -> Snapshot {
        Snapshot {
            evaluated_at,
            lenses: BTreeMap::from([(
                "A".to_string(),
                LensSummary {
                    webset_id: "ws_a".into(),
                    total_items: shaped * 2,
                    shaped_count: shaped,
                    shapes: vec!["always".into()],
                },
            )]),
            join: JoinSnapshot {
                by: JoinBy::Entity,
                entities: entities
                    .iter()
                    .map(|(name, url)| EntitySnapshot {
                        name: name.to_string(),
                        url: url.map(|u| u.to_string()),
                        present_in_lenses: vec!["A".into(), "B".into()],
                        enrichments: BTreeMap::new(),
                    })
                    .collect(),
                lenses_with_evidence: vec!["A".into(), "B".into()],
            },
            signal: SignalSnapshot {
                fired,
                rule_type: SignalKind::Threshold,
                satisfied_by: vec!["A".into(), "B".into()],
                matched_combination: None,
                entities: signal_entities.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn identical_snapshots_have_empty_join_deltas() {
        let now = Utc::now();
        let a = snapshot(now, 3, &[("Acme", Some("https://acme.test"))], true, &["Acme"]);
        let b = snapshot(now + chrono::Duration::minutes(5), 3, &[("Acme", Some("https://acme.test"))], true, &["Acme"]);
        let delta = compute_delta(&a, &b);
        assert!(delta.new_joins.is_empty());
        assert!(delta.lost_joins.is_empty());
        assert!(!delta.signal_transition.changed);
        assert_eq!(delta.per_lens["A"].new_shaped_items, 0);
    }

    #[test]
    fn newly_fired_signal_reports_transition() {
        let now = Utc::now();
        let before = snapshot(now, 0, &[], false, &[]);
        let after = snapshot(
            now + chrono::Duration::hours(2),
            2,
            &[("Acme", Some("https://acme.test"))],
            true,
            &["Acme"],
        );
        let delta = compute_delta(&before, &after);
        assert!(!delta.signal_transition.was && delta.signal_transition.now);
        assert!(delta.signal_transition.changed);
        assert_eq!(delta.signal_transition.new_entities, vec!["Acme"]);
        assert!(delta.signal_transition.lost_entities.is_empty());
        assert_eq!(delta.new_joins, vec!["https://acme.test"]);
        assert_eq!(delta.time_since_last_eval, "2h");
    }

    #[test]
    fn entity_key_prefers_url_over_name() {
        let entity = EntitySnapshot {
            name: "Acme".into(),
            url: Some("https://acme.test".into()),
            present_in_lenses: vec![],
            enrichments: BTreeMap::new(),
        };
        assert_eq!(entity.key(), "https://acme.test");
        let unnamed = EntitySnapshot {
            name: "Acme".into(),
            url: None,
            present_in_lenses: vec![],
            enrichments: BTreeMap::new(),
        };
        assert_eq!(unnamed.key(), "Acme");
    }

    #[test]
    fn shaped_count_regression_clamps_to_zero() {
        let now = Utc::now();
        let before = snapshot(now, 5, &[], false, &[]);
        let after = snapshot(now + chrono::Duration::minutes(1), 3, &[], false, &[]);
        let delta = compute_delta(&before, &after);
        assert_eq!(delta.per_lens["A"].new_shaped_items, 0);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let now = Utc::now();
        let original = snapshot(now, 3, &[("Acme", None)], true, &["Acme"]);
        let value = serde_json::to_value(&original).unwrap();
        let parsed: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.signal.entities, original.signal.entities);
        assert_eq!(parsed.lenses["A"].shaped_count, 3);
    }
}
