//! Shape evaluation: does an item "count" within its lens?
//!
//! Items arrive with enrichment results keyed by opaque enrichment ids; the
//! caller resolves them into a description-indexed bag first, then each
//! shape's conditions read that bag.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use websets_client::{EnrichmentResultStatus, WebsetItem};

use super::config::{Condition, ConditionOp, Shape};
use crate::projections::passes_evaluation_filter;

/// Enrichment values for one item, indexed by enrichment description.
pub type EnrichmentBag = HashMap<String, Vec<String>>;

/// Re-key an item's completed enrichment results by description.
pub fn resolve_enrichments(
    item: &WebsetItem,
    descriptions: &HashMap<String, String>,
) -> EnrichmentBag {
    let mut bag = EnrichmentBag::new();
    for result in &item.enrichments {
        if result.status != EnrichmentResultStatus::Completed {
            continue;
        }
        let Some(values) = &result.result else {
            continue;
        };
        let key = descriptions
            .get(&result.enrichment_id)
            .cloned()
            .unwrap_or_else(|| result.enrichment_id.clone());
        bag.insert(key, values.clone());
    }
    bag
}

fn first_value<'a>(bag: &'a EnrichmentBag, key: &str) -> Option<&'a str> {
    bag.get(key)
        .and_then(|values| values.first())
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Evaluate one condition against a resolved enrichment bag.
///
/// A missing or empty result fails every operator except `exists`, which
/// simply reports false.
pub fn condition_passes(condition: &Condition, bag: &EnrichmentBag, now: DateTime<Utc>) -> bool {
    let value = first_value(bag, &condition.enrichment);

    match condition.op {
        ConditionOp::Exists => value.is_some(),
        ConditionOp::Gte | ConditionOp::Gt | ConditionOp::Lte | ConditionOp::Lt
        | ConditionOp::Eq => {
            let Some(actual) = value.and_then(|v| v.parse::<f64>().ok()) else {
                return false;
            };
            let Some(expected) = condition.value.as_ref().and_then(as_number) else {
                return false;
            };
            match condition.op {
                ConditionOp::Gte => actual >= expected,
                ConditionOp::Gt => actual > expected,
                ConditionOp::Lte => actual <= expected,
                ConditionOp::Lt => actual < expected,
                ConditionOp::Eq => actual == expected,
                _ => false,
            }
        }
        ConditionOp::Contains => match (value, condition.value.as_ref().and_then(|v| v.as_str())) {
            (Some(actual), Some(needle)) => {
                actual.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        ConditionOp::Matches => match (value, condition.value.as_ref().and_then(|v| v.as_str())) {
            (Some(actual), Some(pattern)) => regex::Regex::new(pattern)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
            _ => false,
        },
        ConditionOp::OneOf => {
            let Some(actual) = value else { return false };
            condition
                .value
                .as_ref()
                .and_then(|v| v.as_array())
                .map(|options| {
                    options
                        .iter()
                        .filter_map(|o| o.as_str())
                        .any(|o| o.eq_ignore_ascii_case(actual))
                })
                .unwrap_or(false)
        }
        ConditionOp::WithinDays => {
            let Some(parsed) = value.and_then(parse_date) else {
                return false;
            };
            let Some(days) = condition.value.as_ref().and_then(as_number) else {
                return false;
            };
            let window_ms = (days * 86_400_000.0) as i64;
            (now - parsed).num_milliseconds().abs() <= window_ms
        }
    }
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// A shape passes when its `all` block (if any) holds entirely and its `any`
/// block (if any) holds at least once.
pub fn shape_passes(shape: &Shape, bag: &EnrichmentBag, now: DateTime<Utc>) -> bool {
    if let Some(all) = &shape.matcher.all {
        if !all.iter().all(|c| condition_passes(c, bag, now)) {
            return false;
        }
    }
    if let Some(any) = &shape.matcher.any {
        if !any.iter().any(|c| condition_passes(c, bag, now)) {
            return false;
        }
    }
    true
}

/// Whether an item is *shaped* for a lens: it clears the permissive
/// evaluation pre-filter, then any of the lens's shapes pass (or the lens
/// declares none).
pub fn item_is_shaped(
    item: &WebsetItem,
    shapes: &[&Shape],
    bag: &EnrichmentBag,
    now: DateTime<Utc>,
) -> bool {
    if !passes_evaluation_filter(item) {
        return false;
    }
    if shapes.is_empty() {
        return true;
    }
    shapes.iter().any(|shape| shape_passes(shape, bag, now))
}

/// Compact human-readable label for a shape, used in lens summaries.
pub fn shape_label(shape: &Shape) -> String {
    fn describe(conditions: &[Condition]) -> String {
        conditions
            .iter()
            .map(|c| {
                let op = serde_json::to_value(c.op)
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();
                match &c.value {
                    Some(value) => format!("{} {op} {value}", c.enrichment),
                    None => format!("{} {op}", c.enrichment),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    let mut parts = Vec::new();
    if let Some(all) = &shape.matcher.all {
        parts.push(format!("all({})", describe(all)));
    }
    if let Some(any) = &shape.matcher.any {
        parts.push(format!("any({})", describe(any)));
    }
    if parts.is_empty() {
        "always".to_string()
    } else {
        parts.join(" and ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::semantic_cron::config::ShapeMatch;
    use serde_json::json;

    fn bag(pairs: &[(&str, &[&str])]) -> EnrichmentBag {
        pairs
            .iter()
            .map(|(k, vs)| {
                (
                    k.to_string(),
                    vs.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    fn cond(enrichment: &str, op: ConditionOp, value: Option<serde_json::Value>) -> Condition {
        Condition {
            enrichment: enrichment.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn exists_requires_non_empty_first_result() {
        let now = Utc::now();
        assert!(condition_passes(
            &cond("Funding", ConditionOp::Exists, None),
            &bag(&[("Funding", &["Series B"])]),
            now
        ));
        assert!(!condition_passes(
            &cond("Funding", ConditionOp::Exists, None),
            &bag(&[("Funding", &[""])]),
            now
        ));
        assert!(!condition_passes(
            &cond("Funding", ConditionOp::Exists, None),
            &bag(&[]),
            now
        ));
    }

    #[test]
    fn numeric_operators_parse_first_result() {
        let now = Utc::now();
        let b = bag(&[("Headcount", &["120"])]);
        assert!(condition_passes(&cond("Headcount", ConditionOp::Gte, Some(json!(100))), &b, now));
        assert!(condition_passes(&cond("Headcount", ConditionOp::Lt, Some(json!(200))), &b, now));
        assert!(!condition_passes(&cond("Headcount", ConditionOp::Gt, Some(json!(120))), &b, now));
        assert!(condition_passes(&cond("Headcount", ConditionOp::Eq, Some(json!(120))), &b, now));
    }

    #[test]
    fn unparseable_number_is_false() {
        let now = Utc::now();
        let b = bag(&[("Headcount", &["about a hundred"])]);
        assert!(!condition_passes(&cond("Headcount", ConditionOp::Gte, Some(json!(1))), &b, now));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let now = Utc::now();
        let b = bag(&[("Summary", &["Raised a SERIES B round"])]);
        assert!(condition_passes(
            &cond("Summary", ConditionOp::Contains, Some(json!("series b"))),
            &b,
            now
        ));
    }

    #[test]
    fn matches_applies_regex() {
        let now = Utc::now();
        let b = bag(&[("Summary", &["Raised $12M"])]);
        assert!(condition_passes(
            &cond("Summary", ConditionOp::Matches, Some(json!(r"\$\d+M"))),
            &b,
            now
        ));
        // Invalid pattern is false, not a panic.
        assert!(!condition_passes(
            &cond("Summary", ConditionOp::Matches, Some(json!("("))),
            &b,
            now
        ));
    }

    #[test]
    fn one_of_compares_case_insensitively() {
        let now = Utc::now();
        let b = bag(&[("Stage", &["Series B"])]);
        assert!(condition_passes(
            &cond("Stage", ConditionOp::OneOf, Some(json!(["seed", "series b"]))),
            &b,
            now
        ));
        assert!(!condition_passes(
            &cond("Stage", ConditionOp::OneOf, Some(json!(["seed"]))),
            &b,
            now
        ));
    }

    #[test]
    fn within_days_uses_absolute_difference() {
        let now = Utc::now();
        let recent = (now - chrono::Duration::days(3)).to_rfc3339();
        let old = (now - chrono::Duration::days(30)).to_rfc3339();
        assert!(condition_passes(
            &cond("Announced", ConditionOp::WithinDays, Some(json!(7))),
            &bag(&[("Announced", &[recent.as_str()])]),
            now
        ));
        assert!(!condition_passes(
            &cond("Announced", ConditionOp::WithinDays, Some(json!(7))),
            &bag(&[("Announced", &[old.as_str()])]),
            now
        ));
    }

    #[test]
    fn plain_dates_parse_too() {
        let now = Utc::now();
        let date = (now - chrono::Duration::days(2)).format("%Y-%m-%d").to_string();
        assert!(condition_passes(
            &cond("Announced", ConditionOp::WithinDays, Some(json!(7))),
            &bag(&[("Announced", &[date.as_str()])]),
            now
        ));
    }

    #[test]
    fn all_and_any_blocks_combine() {
        let now = Utc::now();
        let shape = Shape {
            lens_id: "A".into(),
            matcher: ShapeMatch {
                all: Some(vec![cond("Funding", ConditionOp::Exists, None)]),
                any: Some(vec![
                    cond("Headcount", ConditionOp::Gte, Some(json!(100))),
                    cond("Stage", ConditionOp::Eq, Some(json!(2))),
                ]),
            },
        };
        assert!(shape_passes(
            &shape,
            &bag(&[("Funding", &["Series B"]), ("Headcount", &["150"])]),
            now
        ));
        assert!(!shape_passes(
            &shape,
            &bag(&[("Headcount", &["150"])]),
            now
        ));
        assert!(!shape_passes(&shape, &bag(&[("Funding", &["Series B"])]), now));
    }

    #[test]
    fn empty_matcher_always_passes() {
        let shape = Shape {
            lens_id: "A".into(),
            matcher: ShapeMatch::default(),
        };
        assert!(shape_passes(&shape, &bag(&[]), Utc::now()));
        assert_eq!(shape_label(&shape), "always");
    }
}
