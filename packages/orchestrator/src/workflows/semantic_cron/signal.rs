//! Signal evaluation: the composite boolean decision over joined evidence.

use std::collections::BTreeSet;

use super::config::{JoinBy, SignalKind, SignalRequires, DEFAULT_SIGNAL_MIN};
use super::join::{JoinOutcome, JoinedEntity};

/// The decided signal, with everything an agent needs to see why.
#[derive(Debug, Clone)]
pub struct SignalOutcome {
    pub fired: bool,
    pub rule_type: SignalKind,
    /// Lens ids that contributed to the decision.
    pub satisfied_by: Vec<String>,
    pub matched_combination: Option<Vec<String>>,
    /// Canonical names of matching entities (entity modes only).
    pub entities: Vec<String>,
}

/// Evaluate the signal rule over joined entities (entity modes) or the
/// lens-evidence set (temporal / cooccurrence modes).
pub fn evaluate(
    requires: &SignalRequires,
    join_by: JoinBy,
    outcome: &JoinOutcome,
    declared_lenses: &[String],
) -> SignalOutcome {
    match join_by {
        JoinBy::Entity | JoinBy::EntityTemporal => {
            evaluate_over_entities(requires, &outcome.entities, declared_lenses)
        }
        JoinBy::Temporal | JoinBy::Cooccurrence => {
            evaluate_over_evidence(requires, &outcome.lenses_with_evidence, declared_lenses)
        }
    }
}

fn entity_matches(
    requires: &SignalRequires,
    entity: &JoinedEntity,
    declared: &[String],
) -> Option<Option<Vec<String>>> {
    match requires.kind {
        SignalKind::All => declared
            .iter()
            .all(|lens| entity.present_in.contains(lens))
            .then_some(None),
        SignalKind::Any => (!entity.present_in.is_empty()).then_some(None),
        SignalKind::Threshold => {
            let min = requires.min.unwrap_or(DEFAULT_SIGNAL_MIN);
            (entity.present_in.len() >= min).then_some(None)
        }
        SignalKind::Combination => requires
            .sufficient
            .as_ref()
            .and_then(|sets| {
                sets.iter()
                    .find(|combo| combo.iter().all(|lens| entity.present_in.contains(lens)))
            })
            .map(|combo| Some(combo.clone())),
    }
}

fn evaluate_over_entities(
    requires: &SignalRequires,
    entities: &[JoinedEntity],
    declared: &[String],
) -> SignalOutcome {
    let mut matching: Vec<&JoinedEntity> = Vec::new();
    let mut matched_combination = None;

    for entity in entities {
        if let Some(combo) = entity_matches(requires, entity, declared) {
            if matched_combination.is_none() {
                matched_combination = combo;
            }
            matching.push(entity);
        }
    }

    let satisfied_by: BTreeSet<String> = matching
        .iter()
        .flat_map(|e| e.present_in.iter().cloned())
        .collect();

    SignalOutcome {
        fired: !matching.is_empty(),
        rule_type: requires.kind,
        satisfied_by: satisfied_by.into_iter().collect(),
        matched_combination,
        entities: matching.iter().map(|e| e.name.clone()).collect(),
    }
}

fn evaluate_over_evidence(
    requires: &SignalRequires,
    evidence: &BTreeSet<String>,
    declared: &[String],
) -> SignalOutcome {
    let (fired, matched_combination) = match requires.kind {
        SignalKind::All => (declared.iter().all(|lens| evidence.contains(lens)), None),
        SignalKind::Any => (!evidence.is_empty(), None),
        SignalKind::Threshold => {
            let min = requires.min.unwrap_or(DEFAULT_SIGNAL_MIN);
            (evidence.len() >= min, None)
        }
        SignalKind::Combination => {
            let combo = requires.sufficient.as_ref().and_then(|sets| {
                sets.iter()
                    .find(|combo| combo.iter().all(|lens| evidence.contains(lens)))
            });
            (combo.is_some(), combo.cloned())
        }
    };

    SignalOutcome {
        fired,
        rule_type: requires.kind,
        satisfied_by: evidence.iter().cloned().collect(),
        matched_combination,
        entities: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entity(name: &str, lenses: &[&str]) -> JoinedEntity {
        JoinedEntity {
            name: name.to_string(),
            url: None,
            present_in: lenses.iter().map(|l| l.to_string()).collect(),
            sightings: Vec::new(),
            per_lens: HashMap::new(),
        }
    }

    fn outcome_with(entities: Vec<JoinedEntity>) -> JoinOutcome {
        let lenses_with_evidence = entities
            .iter()
            .flat_map(|e| e.present_in.iter().cloned())
            .collect();
        JoinOutcome {
            entities,
            lenses_with_evidence,
        }
    }

    fn requires(kind: SignalKind) -> SignalRequires {
        SignalRequires {
            kind,
            min: None,
            sufficient: None,
        }
    }

    fn declared() -> Vec<String> {
        vec!["A".into(), "B".into(), "C".into()]
    }

    #[test]
    fn all_requires_every_declared_lens() {
        let outcome = outcome_with(vec![entity("Acme", &["A", "B"])]);
        let signal = evaluate(&requires(SignalKind::All), JoinBy::Entity, &outcome, &declared());
        assert!(!signal.fired);

        let outcome = outcome_with(vec![entity("Acme", &["A", "B", "C"])]);
        let signal = evaluate(&requires(SignalKind::All), JoinBy::Entity, &outcome, &declared());
        assert!(signal.fired);
        assert_eq!(signal.entities, vec!["Acme"]);
    }

    #[test]
    fn threshold_defaults_to_two() {
        let outcome = outcome_with(vec![entity("Solo", &["A"]), entity("Pair", &["A", "B"])]);
        let signal =
            evaluate(&requires(SignalKind::Threshold), JoinBy::Entity, &outcome, &declared());
        assert!(signal.fired);
        assert_eq!(signal.entities, vec!["Pair"]);
        assert_eq!(signal.satisfied_by, vec!["A", "B"]);
    }

    #[test]
    fn combination_picks_first_covered_set() {
        let mut req = requires(SignalKind::Combination);
        req.sufficient = Some(vec![
            vec!["A".into(), "B".into()],
            vec!["A".into(), "C".into()],
        ]);
        let outcome = outcome_with(vec![entity("Acme", &["A", "B"])]);
        let signal = evaluate(&req, JoinBy::Entity, &outcome, &declared());
        assert!(signal.fired);
        assert_eq!(
            signal.matched_combination,
            Some(vec!["A".to_string(), "B".to_string()])
        );
        assert_eq!(signal.entities, vec!["Acme"]);
    }

    #[test]
    fn evidence_mode_reports_no_entities() {
        let outcome = JoinOutcome {
            entities: Vec::new(),
            lenses_with_evidence: ["A", "B"].iter().map(|s| s.to_string()).collect(),
        };
        let signal = evaluate(
            &requires(SignalKind::Threshold),
            JoinBy::Cooccurrence,
            &outcome,
            &declared(),
        );
        assert!(signal.fired);
        assert!(signal.entities.is_empty());
        assert_eq!(signal.satisfied_by, vec!["A", "B"]);
    }

    #[test]
    fn evidence_mode_all_needs_every_lens() {
        let outcome = JoinOutcome {
            entities: Vec::new(),
            lenses_with_evidence: ["A", "B"].iter().map(|s| s.to_string()).collect(),
        };
        let signal = evaluate(&requires(SignalKind::All), JoinBy::Temporal, &outcome, &declared());
        assert!(!signal.fired);
    }

    #[test]
    fn unfired_signal_reports_empty_matches() {
        let outcome = outcome_with(vec![]);
        let signal = evaluate(&requires(SignalKind::Any), JoinBy::Entity, &outcome, &declared());
        assert!(!signal.fired);
        assert!(signal.entities.is_empty());
        assert!(signal.satisfied_by.is_empty());
    }
}
