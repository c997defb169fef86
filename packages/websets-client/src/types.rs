use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Websets
// ============================================================================

/// Composite lifecycle status of a webset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebsetStatus {
    Pending,
    Running,
    Idle,
    Paused,
}

/// Progress of a single webset search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchProgress {
    #[serde(default)]
    pub found: u64,
    #[serde(default)]
    pub analyzed: u64,
    /// Percentage in [0, 100].
    #[serde(default)]
    pub completion: f64,
    #[serde(rename = "timeLeft", default)]
    pub time_left: Option<f64>,
}

/// A search criterion attached to a webset search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriterion {
    pub description: String,
    /// Percentage of analyzed items satisfying this criterion, in [0, 100].
    #[serde(rename = "successRate", default)]
    pub success_rate: Option<f64>,
}

/// A search inside a webset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsetSearch {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<SearchProgress>,
    #[serde(default)]
    pub criteria: Vec<SearchCriterion>,
}

/// Result format of an enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentFormat {
    Text,
    Number,
    Options,
    Date,
    Email,
    Phone,
    Url,
}

/// An enrichment definition attached to a webset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub id: String,
    pub description: String,
    pub format: EnrichmentFormat,
}

/// A monitor registered on a webset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: String,
    #[serde(rename = "websetId")]
    pub webset_id: String,
    #[serde(default)]
    pub cadence: Option<MonitorCadence>,
}

/// Cron cadence for a monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorCadence {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "Etc/UTC".to_string()
}

/// An externally stored, stateful dataset of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webset {
    pub id: String,
    pub status: WebsetStatus,
    #[serde(default)]
    pub searches: Vec<WebsetSearch>,
    #[serde(default)]
    pub enrichments: Vec<Enrichment>,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Webset {
    /// The most recently added search, if any.
    pub fn latest_search(&self) -> Option<&WebsetSearch> {
        self.searches.last()
    }
}

// ============================================================================
// Items
// ============================================================================

/// Verdict of one evaluation against one search criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Satisfied {
    Yes,
    No,
    Unclear,
}

/// One criterion evaluation on an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEvaluation {
    pub criterion: String,
    pub satisfied: Satisfied,
}

/// Completion status of an enrichment result on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentResultStatus {
    Pending,
    Completed,
    Canceled,
}

/// The result of one enrichment applied to one item.
///
/// Results are always arrays of strings regardless of the declared format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(rename = "enrichmentId")]
    pub enrichment_id: String,
    pub status: EnrichmentResultStatus,
    pub format: EnrichmentFormat,
    #[serde(default)]
    pub result: Option<Vec<String>>,
}

impl EnrichmentResult {
    /// First result string, if present and non-empty.
    pub fn first_value(&self) -> Option<&str> {
        self.result
            .as_deref()
            .and_then(|r| r.first())
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// A single entity in a webset.
///
/// `properties` carries the entity-type-specific fields (company, person,
/// article, researchPaper, custom) plus `description`/`url`, and may include
/// a large `content` field that callers must never surface by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsetItem {
    pub id: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub evaluations: Vec<ItemEvaluation>,
    #[serde(default)]
    pub enrichments: Vec<EnrichmentResult>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WebsetItem {
    /// The `url` property common to most entity types.
    pub fn url(&self) -> Option<&str> {
        self.properties.get("url").and_then(|v| v.as_str())
    }
}

/// One page of a streaming item listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemsPage {
    pub data: Vec<WebsetItem>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Creation parameters
// ============================================================================

/// Entity kind targeted by a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCriterionParams {
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSearchParams {
    pub query: String,
    pub count: u64,
    pub entity: EntitySpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<CreateCriterionParams>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEnrichmentParams {
    pub description: String,
    pub format: EnrichmentFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateWebsetParams {
    pub search: CreateSearchParams,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enrichments: Vec<CreateEnrichmentParams>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMonitorParams {
    #[serde(rename = "websetId")]
    pub webset_id: String,
    pub cadence: MonitorCadence,
}

// ============================================================================
// Imports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A bulk load of entities from an external file into a webset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Import {
    pub id: String,
    pub status: ImportStatus,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub entity: Option<EntitySpec>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateImportParams {
    pub title: String,
    pub format: String,
    pub entity: EntitySpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// One page of an imports listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportsPage {
    pub data: Vec<Import>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// A change-feed entry for websets, searches, items, and imports.
///
/// `data` carries the full affected object and is reduced at the agent
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One page of an events listing.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsPage {
    pub data: Vec<Event>,
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

// ============================================================================
// Research
// ============================================================================

/// Lifecycle status of a deep-research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ResearchStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ResearchStatus::Completed | ResearchStatus::Failed | ResearchStatus::Canceled
        )
    }
}

/// Output of a completed research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    #[serde(default)]
    pub content: Option<String>,
    /// Structured output when an output schema was supplied.
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
}

/// A deep-research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Research {
    pub id: String,
    pub status: ResearchStatus,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub output: Option<ResearchOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateResearchParams {
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webset_deserializes_with_missing_collections() {
        let webset: Webset =
            serde_json::from_str(r#"{"id": "ws_1", "status": "idle"}"#).unwrap();
        assert_eq!(webset.status, WebsetStatus::Idle);
        assert!(webset.searches.is_empty());
        assert!(webset.latest_search().is_none());
    }

    #[test]
    fn enrichment_result_first_value_skips_empty() {
        let result = EnrichmentResult {
            enrichment_id: "en_1".into(),
            status: EnrichmentResultStatus::Completed,
            format: EnrichmentFormat::Text,
            result: Some(vec!["".into()]),
        };
        assert_eq!(result.first_value(), None);
    }

    #[test]
    fn item_url_reads_properties_bag() {
        let item: WebsetItem = serde_json::from_str(
            r#"{"id": "item_1", "properties": {"url": "https://acme.test"}}"#,
        )
        .unwrap();
        assert_eq!(item.url(), Some("https://acme.test"));
    }

    #[test]
    fn research_terminal_statuses() {
        assert!(ResearchStatus::Completed.is_finished());
        assert!(ResearchStatus::Failed.is_finished());
        assert!(!ResearchStatus::Running.is_finished());
    }
}
