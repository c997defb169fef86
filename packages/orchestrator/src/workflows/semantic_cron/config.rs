//! Semantic-cron configuration: structural records, textual template
//! expansion, and authoritative validation.
//!
//! Validation runs once, up front; every downstream stage assumes the
//! record is well-formed.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use websets_client::EnrichmentFormat;

use crate::kernel::tasks::WorkflowError;

pub const DEFAULT_NAME_THRESHOLD: f64 = 0.85;
pub const DEFAULT_MIN_LENS_OVERLAP: usize = 2;
pub const DEFAULT_SIGNAL_MIN: usize = 2;

// ============================================================================
// Records
// ============================================================================

/// Declarative composite-signal configuration: N lenses feeding shapes,
/// a cross-lens join, and a signal rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub lenses: Vec<Lens>,
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub join: Option<JoinRule>,
    #[serde(default)]
    pub signal: Option<SignalRule>,
    #[serde(default)]
    pub monitor: Option<MonitorSpec>,
}

/// One independent sensor: a new search spec or a bound existing webset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lens {
    pub id: String,
    #[serde(default)]
    pub search: Option<LensSearch>,
    #[serde(default)]
    pub webset_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensSearch {
    pub query: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub enrichments: Vec<LensEnrichment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LensEnrichment {
    pub description: String,
    #[serde(default = "default_format")]
    pub format: EnrichmentFormat,
}

fn default_format() -> EnrichmentFormat {
    EnrichmentFormat::Text
}

/// Item-level predicate over enrichment values, bound to one lens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub lens_id: String,
    #[serde(rename = "match")]
    pub matcher: ShapeMatch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeMatch {
    #[serde(default)]
    pub all: Option<Vec<Condition>>,
    #[serde(default)]
    pub any: Option<Vec<Condition>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Enrichment description the condition reads.
    pub enrichment: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOp {
    Exists,
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
    Contains,
    Matches,
    OneOf,
    WithinDays,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRule {
    pub by: JoinBy,
    #[serde(default = "default_name_threshold")]
    pub name_threshold: f64,
    #[serde(default = "default_min_lens_overlap")]
    pub min_lens_overlap: usize,
    #[serde(default)]
    pub temporal: Option<TemporalWindow>,
}

fn default_name_threshold() -> f64 {
    DEFAULT_NAME_THRESHOLD
}

fn default_min_lens_overlap() -> usize {
    DEFAULT_MIN_LENS_OVERLAP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinBy {
    #[serde(rename = "entity")]
    Entity,
    #[serde(rename = "entity+temporal")]
    EntityTemporal,
    #[serde(rename = "temporal")]
    Temporal,
    #[serde(rename = "cooccurrence")]
    Cooccurrence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemporalWindow {
    pub days: f64,
}

impl TemporalWindow {
    pub fn window_ms(&self) -> i64 {
        (self.days * 86_400_000.0) as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRule {
    pub requires: SignalRequires,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequires {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub min: Option<usize>,
    #[serde(default)]
    pub sufficient: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    All,
    Any,
    Threshold,
    Combination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

// ============================================================================
// Template expansion
// ============================================================================

/// Substitute `{{var}}` tokens across the whole configuration text.
///
/// The config is treated as an opaque text form so placeholders nested
/// inside free-form strings (queries, prompts, enrichment descriptions)
/// are replaced without the caller annotating which fields hold templates.
/// Any residual `{{…}}` after substitution fails validation, naming every
/// unresolved token.
pub fn expand_templates(
    raw: &Value,
    variables: &serde_json::Map<String, Value>,
) -> Result<Value, WorkflowError> {
    let mut text = serde_json::to_string(raw)
        .map_err(|e| WorkflowError::internal("validate", format!("config not serializable: {e}")))?;

    for (name, value) in variables {
        let replacement = match value {
            // String values are spliced into JSON string literals; reuse the
            // serializer for escaping and strip its surrounding quotes.
            Value::String(s) => {
                let quoted = serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());
                quoted[1..quoted.len() - 1].to_string()
            }
            other => other.to_string(),
        };
        text = text.replace(&format!("{{{{{name}}}}}"), &replacement);
    }

    let residual_re = Regex::new(r"\{\{\s*[A-Za-z0-9_.\-]+\s*\}\}")
        .map_err(|e| WorkflowError::internal("validate", e.to_string()))?;
    let mut residuals: Vec<String> = residual_re
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    residuals.sort();
    residuals.dedup();
    if !residuals.is_empty() {
        return Err(WorkflowError::validation(format!(
            "unresolved template variables: {}",
            residuals.join(", ")
        )));
    }

    serde_json::from_str(&text).map_err(|e| {
        WorkflowError::validation(format!("config is not valid JSON after substitution: {e}"))
    })
}

// ============================================================================
// Validation
// ============================================================================

/// Deserialize and validate an expanded configuration.
pub fn parse_config(expanded: Value) -> Result<CronConfig, WorkflowError> {
    let config: CronConfig = serde_json::from_value(expanded)
        .map_err(|e| WorkflowError::validation(format!("invalid config: {e}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &CronConfig) -> Result<(), WorkflowError> {
    if config.lenses.is_empty() {
        return Err(WorkflowError::validation(
            "config must declare at least one lens",
        ));
    }
    if config.shapes.is_empty() {
        return Err(WorkflowError::validation(
            "config must declare at least one shape",
        ));
    }
    let Some(join) = &config.join else {
        return Err(WorkflowError::validation("config.join is required"));
    };
    let Some(signal) = &config.signal else {
        return Err(WorkflowError::validation("config.signal is required"));
    };

    let mut lens_ids: HashSet<&str> = HashSet::new();
    for lens in &config.lenses {
        if !lens_ids.insert(lens.id.as_str()) {
            return Err(WorkflowError::validation(format!(
                "duplicate lens id: {}",
                lens.id
            )));
        }
        if lens.search.is_none() && lens.webset_id.is_none() {
            return Err(WorkflowError::validation(format!(
                "lens {} needs a search spec or a websetId",
                lens.id
            )));
        }
    }

    for shape in &config.shapes {
        if !lens_ids.contains(shape.lens_id.as_str()) {
            return Err(WorkflowError::validation(format!(
                "shape references unknown lens: {}",
                shape.lens_id
            )));
        }
    }

    if matches!(join.by, JoinBy::EntityTemporal | JoinBy::Temporal) && join.temporal.is_none() {
        return Err(WorkflowError::validation(format!(
            "join.by {:?} requires a temporal window",
            join.by
        )));
    }

    if let Some(sufficient) = &signal.requires.sufficient {
        for combo in sufficient {
            for lens_id in combo {
                if !lens_ids.contains(lens_id.as_str()) {
                    return Err(WorkflowError::validation(format!(
                        "signal combination references unknown lens: {lens_id}"
                    )));
                }
            }
        }
    }
    if signal.requires.kind == SignalKind::Combination && signal.requires.sufficient.is_none() {
        return Err(WorkflowError::validation(
            "combination signal requires `sufficient` sets",
        ));
    }

    if let Some(monitor) = &config.monitor {
        if monitor.cron.split_whitespace().count() != 5 {
            return Err(WorkflowError::validation(format!(
                "monitor.cron must be a 5-field cron expression, got {:?}",
                monitor.cron
            )));
        }
    }

    Ok(())
}
