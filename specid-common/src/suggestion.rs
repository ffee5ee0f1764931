//! Canonical suggestion model
//!
//! Every classifier adapter normalises its backend's predictions into this
//! shape; pipeline stages then filter, reorder, enrich and annotate it before
//! it is serialised once at the HTTP boundary.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Verification opinion attached by the Record Cleaner stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordCleanerOpinion {
    /// Degraded outcome shared by every suggestion in the response
    Marker(CleanerMarker),
    /// Per-record result as returned by the verification service
    Verified(Value),
}

/// Literal markers used when no per-record result is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanerMarker {
    /// Observation date or spatial reference missing, verification skipped
    Omit,
    /// Authentication or transport failure
    Error,
    /// Service rejected the submitted records
    Invalid,
}

impl RecordCleanerOpinion {
    pub fn omit() -> Self {
        RecordCleanerOpinion::Marker(CleanerMarker::Omit)
    }

    pub fn error() -> Self {
        RecordCleanerOpinion::Marker(CleanerMarker::Error)
    }

    pub fn invalid() -> Self {
        RecordCleanerOpinion::Marker(CleanerMarker::Invalid)
    }
}

/// One ranked identification candidate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Suggestion {
    /// Probability exactly as reported by the classifier
    pub probability: f64,
    /// Name as reported by the classifier, set once warehouse enrichment ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_taxon: Option<String>,
    /// Classifier name before enrichment; canonical preferred name after a match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxa_taxon_list_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxon_group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organism_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identification_difficulty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_cleaner: Option<RecordCleanerOpinion>,
}

impl Suggestion {
    /// Suggestion carrying only the classifier-reported fields
    pub fn new(probability: f64, taxon: impl Into<String>) -> Self {
        Self {
            probability,
            taxon: Some(taxon.into()),
            ..Default::default()
        }
    }
}

/// Unified classification response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classifier_id: String,
    pub classifier_version: String,
    pub suggestions: Vec<Suggestion>,
    /// Echo of the request's `params` object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Untouched upstream payload, when raw output was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Deserialize an optional integer id given as a number or a numeric string
///
/// The warehouse serialises ids either way depending on the column type.
pub fn flexible_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}

/// Interpret a JSON value as an integer id
pub fn id_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
