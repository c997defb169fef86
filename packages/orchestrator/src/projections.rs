//! Boundary projections.
//!
//! Upstream objects are verbose: items carry full page `content`, reasoning
//! chains, reference lists, and internal bookkeeping. Everything that crosses
//! the agent boundary in bulk is reduced here to decision-relevant shapes.
//! Internal workflow code keeps using the raw objects (classification needs
//! the evaluation metadata); only the exit boundary projects.

use std::collections::HashMap;

use serde_json::{json, Value};
use websets_client::{Enrichment, Event, Import, Research, Satisfied, Webset, WebsetItem};

/// Keys checked, in order, when extracting an entity name.
const NAME_PATHS: &[(&str, &str)] = &[
    ("company", "name"),
    ("person", "name"),
    ("article", "title"),
    ("researchPaper", "title"),
    ("custom", "title"),
];

const ENTITY_KINDS: &[&str] = &["company", "person", "article", "researchPaper", "custom"];

/// Extract a display name from an item's properties bag.
pub fn entity_name(properties: &Value) -> String {
    for (kind, field) in NAME_PATHS {
        if let Some(name) = properties
            .get(kind)
            .and_then(|v| v.get(field))
            .and_then(|v| v.as_str())
        {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    properties
        .get("description")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn entity_type(properties: &Value) -> String {
    if let Some(t) = properties.get("type").and_then(|v| v.as_str()) {
        return t.to_string();
    }
    ENTITY_KINDS
        .iter()
        .find(|kind| properties.get(**kind).is_some())
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Project a single item to its decision-relevant shape.
///
/// Accepts either a raw upstream item (with a `properties` bag) or an
/// already-projected map, making the projection idempotent. `enrichments`
/// maps enrichment ids to their natural-language descriptions so results
/// are re-keyed away from opaque ids.
pub fn project_item(item: &Value, enrichments: &HashMap<String, String>) -> Value {
    let Some(properties) = item.get("properties") else {
        // Already projected: rebuild the same envelope so extra keys drop out.
        return json!({
            "id": item.get("id").cloned().unwrap_or(Value::Null),
            "name": item.get("name").cloned().unwrap_or(Value::Null),
            "url": item.get("url").cloned().unwrap_or(Value::Null),
            "entityType": item.get("entityType").cloned().unwrap_or(Value::Null),
            "description": item.get("description").cloned().unwrap_or(Value::Null),
            "evaluations": item.get("evaluations").cloned().unwrap_or_else(|| json!([])),
            "enrichments": item.get("enrichments").cloned().unwrap_or_else(|| json!([])),
        });
    };

    let evaluations: Vec<Value> = item
        .get("evaluations")
        .and_then(|v| v.as_array())
        .map(|evals| {
            evals
                .iter()
                .map(|e| {
                    json!({
                        "criterion": e.get("criterion").cloned().unwrap_or(Value::Null),
                        "satisfied": e.get("satisfied").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let enrichment_results: Vec<Value> = item
        .get("enrichments")
        .and_then(|v| v.as_array())
        .map(|results| {
            results
                .iter()
                .map(|r| {
                    let id = r
                        .get("enrichmentId")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let description = enrichments
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| id.to_string());
                    json!({
                        "description": description,
                        "format": r.get("format").cloned().unwrap_or(Value::Null),
                        "result": r.get("result").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "id": item.get("id").cloned().unwrap_or(Value::Null),
        "name": entity_name(properties),
        "url": properties.get("url").cloned().unwrap_or(Value::Null),
        "entityType": entity_type(properties),
        "description": properties.get("description").cloned().unwrap_or(Value::Null),
        "evaluations": evaluations,
        "enrichments": enrichment_results,
    })
}

/// Permissive relevance filter: items with evaluations need at least one
/// satisfied verdict; items with no evaluations pass.
pub fn passes_evaluation_filter(item: &WebsetItem) -> bool {
    item.evaluations.is_empty()
        || item
            .evaluations
            .iter()
            .any(|e| e.satisfied == Satisfied::Yes)
}

/// Mandatory envelope for bulk item responses: `{data, total, included, excluded}`.
pub fn project_items_envelope(
    items: &[WebsetItem],
    enrichments: &HashMap<String, String>,
) -> Value {
    let total = items.len();
    let data: Vec<Value> = items
        .iter()
        .filter(|item| passes_evaluation_filter(item))
        .filter_map(|item| serde_json::to_value(item).ok())
        .map(|v| project_item(&v, enrichments))
        .collect();
    let included = data.len();

    json!({
        "data": data,
        "total": total,
        "included": included,
        "excluded": total - included,
    })
}

/// Map a webset's enrichment definitions from id to description.
pub fn enrichment_descriptions(webset: &Webset) -> HashMap<String, String> {
    webset
        .enrichments
        .iter()
        .map(|e| (e.id.clone(), e.description.clone()))
        .collect()
}

/// Project a webset to its decision-relevant shape.
pub fn project_webset(webset: &Webset) -> Value {
    let searches: Vec<Value> = webset
        .searches
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "query": s.query,
                "progress": s.progress,
                "criteria": s.criteria,
            })
        })
        .collect();

    json!({
        "id": webset.id,
        "status": webset.status,
        "searches": searches,
        "enrichments": webset.enrichments.iter().map(|e| {
            json!({"description": e.description, "format": e.format})
        }).collect::<Vec<_>>(),
        "monitorCount": webset.monitors.len(),
    })
}

/// Project an enrichment definition. Unlike enrichment *results* on items,
/// the definition keeps its id so callers can reference it later.
pub fn project_enrichment(enrichment: &Enrichment) -> Value {
    json!({
        "id": enrichment.id,
        "description": enrichment.description,
        "format": enrichment.format,
    })
}

/// Project a bulk import to its decision-relevant shape.
pub fn project_import(import: &Import) -> Value {
    json!({
        "id": import.id,
        "status": import.status,
        "title": import.title,
        "format": import.format,
        "entity": import.entity,
        "count": import.count,
        "createdAt": import.created_at,
    })
}

/// Project a change-feed event.
///
/// Item payloads are reduced through [`project_item`]; any other payload is
/// stripped down to its id so bulky raw objects never cross the boundary.
pub fn project_event(event: &Event) -> Value {
    let data = if event.data.get("properties").is_some() {
        project_item(&event.data, &HashMap::new())
    } else {
        json!({"id": event.data.get("id").cloned().unwrap_or(Value::Null)})
    };

    json!({
        "id": event.id,
        "type": event.kind,
        "createdAt": event.created_at,
        "data": data,
    })
}

/// Project a research run: structured output when present, else text.
pub fn project_research(research: &Research) -> Value {
    let result = research
        .output
        .as_ref()
        .and_then(|o| o.parsed.clone().or_else(|| o.content.clone().map(Value::String)));

    json!({
        "id": research.id,
        "status": research.status,
        "model": research.model,
        "result": result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use websets_client::{
        EnrichmentFormat, EnrichmentResult, EnrichmentResultStatus, ItemEvaluation,
    };

    fn company_item() -> WebsetItem {
        serde_json::from_value(json!({
            "id": "item_1",
            "properties": {
                "type": "company",
                "url": "https://acme.test",
                "description": "Industrial tooling",
                "content": "large scraped page body that must never surface",
                "company": {"name": "Acme Corp"}
            },
            "evaluations": [{"criterion": "b2b", "satisfied": "yes"}],
            "enrichments": [{
                "enrichmentId": "en_1",
                "status": "completed",
                "format": "number",
                "result": ["42"]
            }]
        }))
        .unwrap()
    }

    fn enrich_map() -> HashMap<String, String> {
        HashMap::from([("en_1".to_string(), "Employee count".to_string())])
    }

    #[test]
    fn projects_company_name_and_strips_content() {
        let value = serde_json::to_value(company_item()).unwrap();
        let projected = project_item(&value, &enrich_map());

        assert_eq!(projected["name"], "Acme Corp");
        assert_eq!(projected["entityType"], "company");
        assert_eq!(projected["url"], "https://acme.test");
        assert!(projected.get("properties").is_none());
        assert!(projected.to_string().find("scraped page body").is_none());
    }

    #[test]
    fn enrichment_results_are_keyed_by_description() {
        let value = serde_json::to_value(company_item()).unwrap();
        let projected = project_item(&value, &enrich_map());
        assert_eq!(projected["enrichments"][0]["description"], "Employee count");
        assert!(projected["enrichments"][0].get("enrichmentId").is_none());
        assert!(projected["enrichments"][0].get("status").is_none());
    }

    #[test]
    fn name_precedence_falls_back_to_description_then_unknown() {
        assert_eq!(
            entity_name(&json!({"description": "some article"})),
            "some article"
        );
        assert_eq!(entity_name(&json!({})), "unknown");
        assert_eq!(
            entity_name(&json!({"person": {"name": "Ada"}, "description": "x"})),
            "Ada"
        );
    }

    #[test]
    fn projection_is_idempotent() {
        let value = serde_json::to_value(company_item()).unwrap();
        let once = project_item(&value, &enrich_map());
        let twice = project_item(&once, &enrich_map());
        assert_eq!(once, twice);
    }

    #[test]
    fn envelope_excludes_unsatisfied_items() {
        let satisfied = company_item();
        let mut unsatisfied = company_item();
        unsatisfied.id = "item_2".into();
        unsatisfied.evaluations = vec![ItemEvaluation {
            criterion: "b2b".into(),
            satisfied: Satisfied::No,
        }];
        let mut unevaluated = company_item();
        unevaluated.id = "item_3".into();
        unevaluated.evaluations = vec![];

        let envelope =
            project_items_envelope(&[satisfied, unsatisfied, unevaluated], &enrich_map());
        assert_eq!(envelope["total"], 3);
        assert_eq!(envelope["included"], 2);
        assert_eq!(envelope["excluded"], 1);
    }

    #[test]
    fn event_with_item_payload_projects_the_item() {
        let event: Event = serde_json::from_value(json!({
            "id": "ev_1",
            "type": "webset.item.created",
            "data": {
                "id": "item_1",
                "properties": {
                    "type": "company",
                    "url": "https://acme.test",
                    "content": "huge page body",
                    "company": {"name": "Acme Corp"}
                }
            }
        }))
        .unwrap();
        let projected = project_event(&event);
        assert_eq!(projected["type"], "webset.item.created");
        assert_eq!(projected["data"]["name"], "Acme Corp");
        assert!(projected.to_string().find("huge page body").is_none());
    }

    #[test]
    fn event_with_other_payload_keeps_only_the_id() {
        let event: Event = serde_json::from_value(json!({
            "id": "ev_2",
            "type": "webset.created",
            "data": {"id": "ws_1", "status": "running", "searches": []}
        }))
        .unwrap();
        let projected = project_event(&event);
        assert_eq!(projected["data"], json!({"id": "ws_1"}));
    }

    #[test]
    fn pending_enrichment_projects_without_result() {
        let mut item = company_item();
        item.enrichments = vec![EnrichmentResult {
            enrichment_id: "en_1".into(),
            status: EnrichmentResultStatus::Pending,
            format: EnrichmentFormat::Number,
            result: None,
        }];
        let value = serde_json::to_value(item).unwrap();
        let projected = project_item(&value, &enrich_map());
        assert_eq!(projected["enrichments"][0]["result"], Value::Null);
    }
}
