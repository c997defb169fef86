//! Pass-through primitive operations: thin forwards to the upstream with
//! projections applied at the boundary.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use websets_client::{
    CreateEnrichmentParams, CreateImportParams, CreateMonitorParams, CreateResearchParams,
    EntitySpec, MonitorCadence,
};

use crate::kernel::OrchestratorDeps;
use crate::projections::{
    enrichment_descriptions, project_enrichment, project_event, project_import,
    project_items_envelope, project_research, project_webset,
};
use crate::workflows::helpers;

fn require_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .with_context(|| format!("{key} is required"))
}

pub async fn websets_create(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let query = require_str(args, "query")?;
    let count = args.get("count").and_then(|v| v.as_u64()).unwrap_or(10);
    let params = helpers::webset_params(&query, count, args)
        .map_err(|e| anyhow::anyhow!(e.message))?;
    let webset = deps.client.create_webset(params).await?;
    Ok(project_webset(&webset))
}

pub async fn websets_get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let webset = deps.client.get_webset(&webset_id).await?;
    Ok(project_webset(&webset))
}

pub async fn websets_cancel(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let webset = deps.client.cancel_webset(&webset_id).await?;
    Ok(project_webset(&webset))
}

pub async fn websets_delete(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    deps.client.delete_webset(&webset_id).await?;
    Ok(json!({"deleted": webset_id}))
}

/// Bulk item listing with the mandatory `{data, total, included, excluded}`
/// envelope.
pub async fn items_list(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(25);

    let webset = deps.client.get_webset(&webset_id).await?;
    let enrich_map = enrichment_descriptions(&webset);

    let mut items = Vec::new();
    let mut cursor = None;
    loop {
        let page = deps
            .client
            .list_items(&webset_id, cursor, limit.min(100))
            .await?;
        items.extend(page.data);
        if items.len() as u64 >= limit || !page.has_more || page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }
    items.truncate(limit as usize);

    Ok(project_items_envelope(&items, &enrich_map))
}

pub async fn enrichments_create(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let description = require_str(args, "description")?;
    let format = args
        .get("format")
        .map(|f| {
            serde_json::from_value(f.clone())
                .with_context(|| format!("invalid enrichment format: {f}"))
        })
        .transpose()?
        .unwrap_or(websets_client::EnrichmentFormat::Text);

    let enrichment = deps
        .client
        .create_enrichment(&webset_id, CreateEnrichmentParams { description, format })
        .await?;
    Ok(project_enrichment(&enrichment))
}

pub async fn enrichments_get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let enrichment_id = require_str(args, "enrichmentId")?;
    let enrichment = deps.client.get_enrichment(&webset_id, &enrichment_id).await?;
    Ok(project_enrichment(&enrichment))
}

/// Enrichment definitions live on the webset; listing reads them from there.
pub async fn enrichments_list(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let webset = deps.client.get_webset(&webset_id).await?;
    let data: Vec<Value> = webset.enrichments.iter().map(project_enrichment).collect();
    Ok(json!({"data": data}))
}

pub async fn imports_create(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let title = require_str(args, "title")?;
    let format = args
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("csv")
        .to_string();
    let kind = args
        .get("entity")
        .and_then(|e| e.get("type"))
        .and_then(|v| v.as_str())
        .context("entity.type is required")?
        .to_string();

    let import = deps
        .client
        .create_import(CreateImportParams {
            title,
            format,
            entity: EntitySpec { kind },
            count: args.get("count").and_then(|v| v.as_u64()),
        })
        .await?;
    Ok(project_import(&import))
}

pub async fn imports_get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let import_id = require_str(args, "importId")?;
    let import = deps.client.get_import(&import_id).await?;
    Ok(project_import(&import))
}

pub async fn imports_list(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(25);
    let cursor = args
        .get("cursor")
        .and_then(|v| v.as_str())
        .map(String::from);
    let page = deps.client.list_imports(cursor, limit).await?;
    let data: Vec<Value> = page.data.iter().map(project_import).collect();
    Ok(json!({"data": data, "hasMore": page.has_more, "nextCursor": page.next_cursor}))
}

pub async fn events_get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let event_id = require_str(args, "eventId")?;
    let event = deps.client.get_event(&event_id).await?;
    Ok(project_event(&event))
}

pub async fn events_list(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(25);
    let cursor = args
        .get("cursor")
        .and_then(|v| v.as_str())
        .map(String::from);
    let page = deps.client.list_events(cursor, limit).await?;
    let data: Vec<Value> = page.data.iter().map(project_event).collect();
    Ok(json!({"data": data, "hasMore": page.has_more, "nextCursor": page.next_cursor}))
}

pub async fn monitors_create(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let webset_id = require_str(args, "websetId")?;
    let cron = require_str(args, "cron")?;
    let timezone = args
        .get("timezone")
        .and_then(|v| v.as_str())
        .unwrap_or("Etc/UTC")
        .to_string();

    let monitor = deps
        .client
        .create_monitor(CreateMonitorParams {
            webset_id,
            cadence: MonitorCadence { cron, timezone },
        })
        .await?;
    Ok(serde_json::to_value(&monitor)?)
}

pub async fn research_create(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let instructions = require_str(args, "instructions")?;
    let research = deps
        .client
        .create_research(CreateResearchParams {
            instructions,
            model: args.get("model").and_then(|v| v.as_str()).map(String::from),
            output_schema: args.get("outputSchema").cloned(),
        })
        .await?;
    Ok(project_research(&research))
}

pub async fn research_get(deps: &OrchestratorDeps, args: &Value) -> Result<Value> {
    let research_id = require_str(args, "researchId")?;
    let research = deps.client.get_research(&research_id).await?;
    Ok(project_research(&research))
}
