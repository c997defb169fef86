//! Shared primitives used by every workflow: step timing, poll-to-idle,
//! bounded item collection, cancellation checkpoints, and arg validators.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};
use websets_client::{
    CreateCriterionParams, CreateEnrichmentParams, CreateSearchParams, CreateWebsetParams,
    EntitySpec, Webset, WebsetItem, WebsetStatus,
};

use crate::kernel::tasks::{TaskProgress, WorkflowCtx, WorkflowError};

/// Page size used when streaming items from the upstream.
const ITEM_PAGE_SIZE: u64 = 100;

// ============================================================================
// Step tracker
// ============================================================================

/// Timing record for one named workflow step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub duration_ms: u64,
}

/// Records `(name, durationMs)` per step; emitted in workflow results.
#[derive(Default)]
pub struct StepTracker {
    records: Vec<StepRecord>,
    current: Option<(String, Instant)>,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a step, closing out any step still open.
    pub fn begin(&mut self, name: impl Into<String>) {
        self.finish();
        self.current = Some((name.into(), Instant::now()));
    }

    /// Close the open step, if any.
    pub fn finish(&mut self) {
        if let Some((name, started)) = self.current.take() {
            self.records.push(StepRecord {
                name,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    /// Finish and serialize for inclusion in a workflow result.
    pub fn into_value(mut self) -> serde_json::Value {
        self.finish();
        serde_json::to_value(&self.records).unwrap_or_default()
    }
}

// ============================================================================
// Poll-to-idle
// ============================================================================

/// Options for [`poll_until_idle`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Per-step deadline; elapsing it is reported, not raised.
    pub timeout: Duration,
    /// Refresh cadence.
    pub interval: Duration,
    /// Whether an observed task cancellation also cancels the polled webset
    /// upstream. True for websets the workflow created; false for websets
    /// bound from outside, which the workflow does not own.
    pub cancel_webset_on_abort: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(2),
            cancel_webset_on_abort: true,
        }
    }
}

impl PollOptions {
    /// Read a `timeout` (milliseconds) override from task args.
    pub fn from_args(args: &serde_json::Value) -> Self {
        let mut opts = Self::default();
        if let Some(ms) = args.get("timeout").and_then(|v| v.as_u64()) {
            opts.timeout = Duration::from_millis(ms);
        }
        opts
    }
}

/// Outcome of driving a webset toward `idle`.
pub struct PollOutcome {
    pub webset: Webset,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Drive the webset lifecycle until `idle`, mirroring search progress into
/// the task record on every refresh.
///
/// - `paused` fails the step with a non-recoverable error.
/// - An elapsed deadline returns `timed_out: true` without raising, so the
///   workflow may return partial results.
/// - An observed task cancellation requests upstream cancel of the dataset
///   and returns early with `cancelled: true`.
pub async fn poll_until_idle(
    ctx: &WorkflowCtx,
    webset_id: &str,
    step: &str,
    progress: (u32, u32),
    opts: &PollOptions,
) -> Result<PollOutcome, WorkflowError> {
    let deadline = Instant::now() + opts.timeout;

    loop {
        let webset = ctx
            .client
            .get_webset(webset_id)
            .await
            .map_err(|e| WorkflowError::upstream(step, &e))?;

        if let Some(search_progress) = webset.latest_search().and_then(|s| s.progress.as_ref()) {
            ctx.store.update_progress(
                &ctx.task_id,
                TaskProgress::at_step(step, progress.0, progress.1).with_message(format!(
                    "found {}, analyzed {}",
                    search_progress.found, search_progress.analyzed
                )),
            );
        }

        match webset.status {
            WebsetStatus::Idle => {
                return Ok(PollOutcome {
                    webset,
                    timed_out: false,
                    cancelled: false,
                })
            }
            WebsetStatus::Paused => {
                return Err(WorkflowError {
                    step: step.to_string(),
                    message: format!("webset {webset_id} is paused"),
                    recoverable: false,
                })
            }
            WebsetStatus::Pending | WebsetStatus::Running => {}
        }

        if ctx.store.is_cancelled(&ctx.task_id) {
            if opts.cancel_webset_on_abort {
                cancel_owned_websets(ctx, std::slice::from_ref(&webset.id)).await;
            }
            return Ok(PollOutcome {
                webset,
                timed_out: false,
                cancelled: true,
            });
        }

        if Instant::now() >= deadline {
            debug!(webset_id = %webset_id, step = %step, "poll deadline elapsed");
            return Ok(PollOutcome {
                webset,
                timed_out: true,
                cancelled: false,
            });
        }

        tokio::time::sleep(opts.interval).await;
    }
}

// ============================================================================
// Item collection
// ============================================================================

/// Iterate the upstream's streaming item listing, capped at `cap` items.
pub async fn collect_items(
    ctx: &WorkflowCtx,
    webset_id: &str,
    cap: usize,
    step: &str,
) -> Result<Vec<WebsetItem>, WorkflowError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = ctx
            .client
            .list_items(webset_id, cursor, ITEM_PAGE_SIZE)
            .await
            .map_err(|e| WorkflowError::upstream(step, &e))?;
        items.extend(page.data);

        if items.len() >= cap || !page.has_more || page.next_cursor.is_none() {
            break;
        }
        cursor = page.next_cursor;
    }

    items.truncate(cap);
    Ok(items)
}

// ============================================================================
// Cancellation
// ============================================================================

/// Checkpoint probe.
pub fn is_cancelled(ctx: &WorkflowCtx) -> bool {
    ctx.store.is_cancelled(&ctx.task_id)
}

/// Best-effort upstream cancel of websets this workflow created. At most one
/// call per webset; failures are logged and dropped.
pub async fn cancel_owned_websets(ctx: &WorkflowCtx, webset_ids: &[String]) {
    for webset_id in webset_ids {
        if let Err(e) = ctx.client.cancel_webset(webset_id).await {
            warn!(webset_id = %webset_id, error = %e, "best-effort webset cancel failed");
        }
    }
}

// ============================================================================
// Arg validators
// ============================================================================

pub fn require_str(args: &serde_json::Value, key: &str) -> Result<String, WorkflowError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| WorkflowError::validation(format!("{key} is required")))
}

pub fn optional_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn optional_u64(args: &serde_json::Value, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

pub fn optional_f64(args: &serde_json::Value, key: &str, default: f64) -> f64 {
    args.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

pub fn optional_bool(args: &serde_json::Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Read `{entity: {type}}`, required for search-creating workflows.
pub fn require_entity(args: &serde_json::Value) -> Result<EntitySpec, WorkflowError> {
    let kind = args
        .get("entity")
        .and_then(|e| e.get("type"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkflowError::validation("entity.type is required"))?;
    Ok(EntitySpec {
        kind: kind.to_string(),
    })
}

/// Build search params from the common `{query, entity, count, criteria}` args.
pub fn search_params(
    query: &str,
    entity: EntitySpec,
    count: u64,
    args: &serde_json::Value,
) -> CreateSearchParams {
    let criteria = args
        .get("criteria")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|c| c.as_str())
                .map(|description| CreateCriterionParams {
                    description: description.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    CreateSearchParams {
        query: query.to_string(),
        count,
        entity,
        criteria,
    }
}

/// Parse `{enrichments: [{description, format}]}` from task args.
pub fn enrichment_params(
    args: &serde_json::Value,
) -> Result<Vec<CreateEnrichmentParams>, WorkflowError> {
    let Some(list) = args.get("enrichments").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    list.iter()
        .map(|e| {
            let description = e
                .get("description")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    WorkflowError::validation("enrichments[].description is required")
                })?;
            let format = e
                .get("format")
                .map(|f| {
                    serde_json::from_value(f.clone()).map_err(|_| {
                        WorkflowError::validation(format!("invalid enrichment format: {f}"))
                    })
                })
                .transpose()?
                .unwrap_or(websets_client::EnrichmentFormat::Text);
            Ok(CreateEnrichmentParams {
                description: description.to_string(),
                format,
            })
        })
        .collect()
}

/// Assemble full webset creation params from common workflow args.
pub fn webset_params(
    query: &str,
    count: u64,
    args: &serde_json::Value,
) -> Result<CreateWebsetParams, WorkflowError> {
    Ok(CreateWebsetParams {
        search: search_params(query, require_entity(args)?, count, args),
        enrichments: enrichment_params(args)?,
    })
}

// ============================================================================
// Test doubles
// ============================================================================

/// Scriptable upstream doubles shared by unit and integration tests.
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use websets_client::{
        CreateEnrichmentParams, CreateImportParams, CreateMonitorParams, CreateResearchParams,
        CreateWebsetParams, Enrichment, EnrichmentFormat, Event, EventsPage, Import, ImportsPage,
        ImportStatus, ItemsPage, Monitor, Research, ResearchOutput, ResearchStatus, Result,
        SearchCriterion, SearchProgress, Webset, WebsetItem, WebsetSearch, WebsetsApi,
        WebsetsError, WebsetStatus,
    };

    /// Upstream that fails every call; for code paths that never reach it.
    pub struct NullApi;

    #[async_trait]
    impl WebsetsApi for NullApi {
        async fn create_webset(&self, _params: CreateWebsetParams) -> Result<Webset> {
            Err(unreachable_call())
        }
        async fn get_webset(&self, _id: &str) -> Result<Webset> {
            Err(unreachable_call())
        }
        async fn cancel_webset(&self, _id: &str) -> Result<Webset> {
            Err(unreachable_call())
        }
        async fn delete_webset(&self, _id: &str) -> Result<()> {
            Err(unreachable_call())
        }
        async fn list_items(
            &self,
            _webset_id: &str,
            _cursor: Option<String>,
            _limit: u64,
        ) -> Result<ItemsPage> {
            Err(unreachable_call())
        }
        async fn create_monitor(&self, _params: CreateMonitorParams) -> Result<Monitor> {
            Err(unreachable_call())
        }
        async fn create_enrichment(
            &self,
            _webset_id: &str,
            _params: CreateEnrichmentParams,
        ) -> Result<Enrichment> {
            Err(unreachable_call())
        }
        async fn get_enrichment(&self, _webset_id: &str, _id: &str) -> Result<Enrichment> {
            Err(unreachable_call())
        }
        async fn create_import(&self, _params: CreateImportParams) -> Result<Import> {
            Err(unreachable_call())
        }
        async fn get_import(&self, _id: &str) -> Result<Import> {
            Err(unreachable_call())
        }
        async fn list_imports(&self, _cursor: Option<String>, _limit: u64) -> Result<ImportsPage> {
            Err(unreachable_call())
        }
        async fn list_events(&self, _cursor: Option<String>, _limit: u64) -> Result<EventsPage> {
            Err(unreachable_call())
        }
        async fn get_event(&self, _id: &str) -> Result<Event> {
            Err(unreachable_call())
        }
        async fn create_research(&self, _params: CreateResearchParams) -> Result<Research> {
            Err(unreachable_call())
        }
        async fn get_research(&self, _id: &str) -> Result<Research> {
            Err(unreachable_call())
        }
    }

    fn unreachable_call() -> WebsetsError {
        WebsetsError::Api {
            status: 500,
            message: "unexpected upstream call in test".into(),
        }
    }

    #[derive(Default)]
    pub struct MockState {
        pub websets: HashMap<String, Webset>,
        pub items: HashMap<String, Vec<WebsetItem>>,
        /// Items seeded per query; copied to a webset when a search creates it.
        pub items_by_query: HashMap<String, Vec<WebsetItem>>,
        /// How many `get_webset` calls before a webset reports `idle`.
        pub polls_until_idle: u32,
        remaining_polls: HashMap<String, u32>,
        /// When set, websets stay `running` forever.
        pub never_idle: bool,
        pub cancelled_websets: Vec<String>,
        pub deleted_websets: Vec<String>,
        pub monitors: Vec<CreateMonitorParams>,
        pub monitors_fail: bool,
        pub imports: Vec<Import>,
        pub events: Vec<Event>,
        pub research_requests: Vec<CreateResearchParams>,
        pub research_fails: bool,
        pub research_output: Option<ResearchOutput>,
        counter: u32,
    }

    /// In-memory upstream scripted through [`MockState`].
    #[derive(Default)]
    pub struct MockApi {
        pub state: Mutex<MockState>,
    }

    impl MockApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_state(f: impl FnOnce(&mut MockState)) -> Self {
            let mock = Self::default();
            f(&mut mock.state.lock().unwrap());
            mock
        }

        /// Seed a pre-existing webset with items (for bound-webset flows).
        pub fn seed_webset(&self, webset: Webset, items: Vec<WebsetItem>) {
            let mut state = self.state.lock().unwrap();
            state.items.insert(webset.id.clone(), items);
            state.websets.insert(webset.id.clone(), webset);
        }

        pub fn cancelled_websets(&self) -> Vec<String> {
            self.state.lock().unwrap().cancelled_websets.clone()
        }

        pub fn monitors(&self) -> Vec<CreateMonitorParams> {
            self.state.lock().unwrap().monitors.clone()
        }

        pub fn research_requests(&self) -> Vec<CreateResearchParams> {
            self.state.lock().unwrap().research_requests.clone()
        }
    }

    #[async_trait]
    impl WebsetsApi for MockApi {
        async fn create_webset(&self, params: CreateWebsetParams) -> Result<Webset> {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            let id = format!("ws_mock{}", state.counter);

            let enrichments = params
                .enrichments
                .iter()
                .enumerate()
                .map(|(i, e)| Enrichment {
                    id: format!("en_mock{}_{i}", state.counter),
                    description: e.description.clone(),
                    format: e.format,
                })
                .collect();

            let webset = Webset {
                id: id.clone(),
                status: WebsetStatus::Running,
                searches: vec![WebsetSearch {
                    id: format!("search_mock{}", state.counter),
                    query: params.search.query.clone(),
                    status: Some("running".into()),
                    progress: Some(SearchProgress {
                        found: 0,
                        analyzed: 0,
                        completion: 0.0,
                        time_left: None,
                    }),
                    criteria: params
                        .search
                        .criteria
                        .iter()
                        .map(|c| SearchCriterion {
                            description: c.description.clone(),
                            success_rate: Some(50.0),
                        })
                        .collect(),
                }],
                enrichments,
                monitors: vec![],
                created_at: Some(Utc::now()),
            };

            let seeded = state
                .items_by_query
                .get(&params.search.query)
                .cloned()
                .unwrap_or_default();
            state.items.insert(id.clone(), seeded);
            let polls = state.polls_until_idle;
            state.remaining_polls.insert(id.clone(), polls);
            state.websets.insert(id.clone(), webset.clone());
            Ok(webset)
        }

        async fn get_webset(&self, id: &str) -> Result<Webset> {
            let mut state = self.state.lock().unwrap();
            let never_idle = state.never_idle;
            let remaining = {
                let entry = state.remaining_polls.entry(id.to_string()).or_insert(0);
                let value = *entry;
                *entry = entry.saturating_sub(1);
                value
            };
            let item_count = state.items.get(id).map(|i| i.len()).unwrap_or(0) as u64;
            let webset = state
                .websets
                .get_mut(id)
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("webset {id} not found"),
                })?;

            if !never_idle && remaining == 0 && webset.status == WebsetStatus::Running {
                webset.status = WebsetStatus::Idle;
                if let Some(search) = webset.searches.last_mut() {
                    search.status = Some("completed".into());
                    search.progress = Some(SearchProgress {
                        found: item_count,
                        analyzed: item_count * 2,
                        completion: 100.0,
                        time_left: Some(0.0),
                    });
                }
            }
            Ok(webset.clone())
        }

        async fn cancel_webset(&self, id: &str) -> Result<Webset> {
            let mut state = self.state.lock().unwrap();
            state.cancelled_websets.push(id.to_string());
            state
                .websets
                .get(id)
                .cloned()
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("webset {id} not found"),
                })
        }

        async fn delete_webset(&self, id: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.deleted_websets.push(id.to_string());
            state.websets.remove(id);
            state.items.remove(id);
            Ok(())
        }

        async fn list_items(
            &self,
            webset_id: &str,
            cursor: Option<String>,
            limit: u64,
        ) -> Result<ItemsPage> {
            let state = self.state.lock().unwrap();
            let items = state.items.get(webset_id).cloned().unwrap_or_default();
            let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let end = (offset + limit as usize).min(items.len());
            let page: Vec<WebsetItem> = items[offset.min(items.len())..end].to_vec();
            let has_more = end < items.len();
            Ok(ItemsPage {
                data: page,
                has_more,
                next_cursor: has_more.then(|| end.to_string()),
            })
        }

        async fn create_monitor(&self, params: CreateMonitorParams) -> Result<Monitor> {
            let mut state = self.state.lock().unwrap();
            if state.monitors_fail {
                return Err(WebsetsError::Api {
                    status: 422,
                    message: "monitor quota exceeded".into(),
                });
            }
            state.monitors.push(params.clone());
            Ok(Monitor {
                id: format!("mon_mock{}", state.monitors.len()),
                webset_id: params.webset_id,
                cadence: Some(params.cadence),
            })
        }

        async fn create_enrichment(
            &self,
            webset_id: &str,
            params: CreateEnrichmentParams,
        ) -> Result<Enrichment> {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            let enrichment = Enrichment {
                id: format!("en_mock{}", state.counter),
                description: params.description,
                format: params.format,
            };
            let webset = state
                .websets
                .get_mut(webset_id)
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("webset {webset_id} not found"),
                })?;
            webset.enrichments.push(enrichment.clone());
            Ok(enrichment)
        }

        async fn get_enrichment(&self, webset_id: &str, id: &str) -> Result<Enrichment> {
            let state = self.state.lock().unwrap();
            state
                .websets
                .get(webset_id)
                .and_then(|w| w.enrichments.iter().find(|e| e.id == id))
                .cloned()
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("enrichment {id} not found"),
                })
        }

        async fn create_import(&self, params: CreateImportParams) -> Result<Import> {
            let mut state = self.state.lock().unwrap();
            state.counter += 1;
            let import = Import {
                id: format!("import_mock{}", state.counter),
                status: ImportStatus::Pending,
                title: Some(params.title),
                format: Some(params.format),
                entity: Some(params.entity),
                count: params.count,
                created_at: Some(Utc::now()),
            };
            state.imports.push(import.clone());
            Ok(import)
        }

        async fn get_import(&self, id: &str) -> Result<Import> {
            let state = self.state.lock().unwrap();
            state
                .imports
                .iter()
                .find(|i| i.id == id)
                .cloned()
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("import {id} not found"),
                })
        }

        async fn list_imports(&self, _cursor: Option<String>, limit: u64) -> Result<ImportsPage> {
            let state = self.state.lock().unwrap();
            Ok(ImportsPage {
                data: state.imports.iter().take(limit as usize).cloned().collect(),
                has_more: state.imports.len() as u64 > limit,
                next_cursor: None,
            })
        }

        async fn list_events(&self, _cursor: Option<String>, limit: u64) -> Result<EventsPage> {
            let state = self.state.lock().unwrap();
            Ok(EventsPage {
                data: state.events.iter().take(limit as usize).cloned().collect(),
                has_more: state.events.len() as u64 > limit,
                next_cursor: None,
            })
        }

        async fn get_event(&self, id: &str) -> Result<Event> {
            let state = self.state.lock().unwrap();
            state
                .events
                .iter()
                .find(|e| e.id == id)
                .cloned()
                .ok_or_else(|| WebsetsError::Api {
                    status: 404,
                    message: format!("event {id} not found"),
                })
        }

        async fn create_research(&self, params: CreateResearchParams) -> Result<Research> {
            let mut state = self.state.lock().unwrap();
            if state.research_fails {
                return Err(WebsetsError::Api {
                    status: 500,
                    message: "research backend unavailable".into(),
                });
            }
            state.research_requests.push(params.clone());
            let id = format!("res_mock{}", state.research_requests.len());
            Ok(Research {
                id,
                status: ResearchStatus::Running,
                model: Some("exa-research".into()),
                output: None,
            })
        }

        async fn get_research(&self, id: &str) -> Result<Research> {
            let state = self.state.lock().unwrap();
            Ok(Research {
                id: id.to_string(),
                status: ResearchStatus::Completed,
                model: Some("exa-research".into()),
                output: Some(state.research_output.clone().unwrap_or(ResearchOutput {
                    content: Some("synthesized findings".into()),
                    parsed: None,
                })),
            })
        }
    }

    /// Build an idle webset shell for seeding.
    pub fn idle_webset(id: &str) -> Webset {
        Webset {
            id: id.to_string(),
            status: WebsetStatus::Idle,
            searches: vec![],
            enrichments: vec![],
            monitors: vec![],
            created_at: Some(Utc::now()),
        }
    }

    /// Build a minimal company item for tests.
    pub fn company_item(id: &str, name: &str, url: &str) -> WebsetItem {
        item_with_created_at(id, name, url, Utc::now())
    }

    pub fn item_with_created_at(
        id: &str,
        name: &str,
        url: &str,
        created_at: DateTime<Utc>,
    ) -> WebsetItem {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "properties": {
                "type": "company",
                "url": url,
                "description": format!("{name} description"),
                "company": {"name": name}
            },
            "createdAt": created_at,
        }))
        .unwrap()
    }

    /// Attach a completed enrichment result to an item.
    pub fn with_enrichment(
        mut item: WebsetItem,
        enrichment_id: &str,
        format: EnrichmentFormat,
        values: &[&str],
    ) -> WebsetItem {
        item.enrichments.push(
            serde_json::from_value(serde_json::json!({
                "enrichmentId": enrichment_id,
                "status": "completed",
                "format": format,
                "result": values,
            }))
            .unwrap(),
        );
        item
    }

    /// Attach criterion evaluations (`true` → yes, `false` → no) to an item.
    pub fn with_evaluations(mut item: WebsetItem, verdicts: &[(&str, bool)]) -> WebsetItem {
        for (criterion, satisfied) in verdicts {
            item.evaluations.push(
                serde_json::from_value(serde_json::json!({
                    "criterion": criterion,
                    "satisfied": if *satisfied { "yes" } else { "no" },
                }))
                .unwrap(),
            );
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use websets_client::WebsetsApi;

    use crate::kernel::tasks::TaskStore;
    use testing::MockApi;

    fn ctx_with(client: Arc<dyn websets_client::WebsetsApi>) -> WorkflowCtx {
        let store = Arc::new(TaskStore::default());
        let task = store.create("test", serde_json::Value::Null).unwrap();
        WorkflowCtx {
            task_id: task.id,
            args: serde_json::Value::Null,
            client,
            store,
        }
    }

    #[test]
    fn step_tracker_records_in_order() {
        let mut tracker = StepTracker::new();
        tracker.begin("create_webset");
        tracker.begin("poll");
        tracker.finish();
        let value = tracker.into_value();
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["create_webset", "poll"]);
    }

    #[test]
    fn require_str_rejects_blank() {
        let args = serde_json::json!({"query": "  "});
        assert!(require_str(&args, "query").is_err());
        assert!(require_str(&args, "missing").is_err());
    }

    #[test]
    fn entity_type_is_required() {
        assert!(require_entity(&serde_json::json!({})).is_err());
        let entity = require_entity(&serde_json::json!({"entity": {"type": "company"}})).unwrap();
        assert_eq!(entity.kind, "company");
    }

    #[test]
    fn enrichment_params_parse_formats() {
        let args = serde_json::json!({"enrichments": [
            {"description": "Employee count", "format": "number"},
            {"description": "Summary"},
        ]});
        let parsed = enrichment_params(&args).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].format, websets_client::EnrichmentFormat::Number);
        assert_eq!(parsed[1].format, websets_client::EnrichmentFormat::Text);
    }

    #[tokio::test]
    async fn poll_times_out_without_error() {
        let mock = Arc::new(MockApi::with_state(|s| s.never_idle = true));
        let ctx = ctx_with(mock.clone());
        let webset = mock
            .create_webset(webset_params("q", 5, &serde_json::json!({"entity": {"type": "company"}})).unwrap())
            .await
            .unwrap();

        let opts = PollOptions {
            timeout: Duration::from_millis(20),
            interval: Duration::from_millis(5),
            ..Default::default()
        };
        let outcome = poll_until_idle(&ctx, &webset.id, "poll", (1, 3), &opts)
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn poll_observes_cancellation_and_cancels_upstream() {
        let mock = Arc::new(MockApi::with_state(|s| s.never_idle = true));
        let ctx = ctx_with(mock.clone());
        let webset = mock
            .create_webset(webset_params("q", 5, &serde_json::json!({"entity": {"type": "company"}})).unwrap())
            .await
            .unwrap();
        ctx.store.cancel(&ctx.task_id);

        let opts = PollOptions {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(5),
            ..Default::default()
        };
        let outcome = poll_until_idle(&ctx, &webset.id, "poll", (1, 3), &opts)
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(mock.cancelled_websets(), vec![webset.id]);
    }

    #[tokio::test]
    async fn collect_items_pages_and_caps() {
        let mock = Arc::new(MockApi::new());
        let items: Vec<_> = (0..250)
            .map(|i| testing::company_item(&format!("item_{i}"), &format!("Co {i}"), &format!("https://co{i}.test")))
            .collect();
        mock.seed_webset(testing::idle_webset("ws_seeded"), items);
        let ctx = ctx_with(mock);

        let collected = collect_items(&ctx, "ws_seeded", 120, "collect").await.unwrap();
        assert_eq!(collected.len(), 120);
        assert_eq!(collected[0].id, "item_0");
    }
}
