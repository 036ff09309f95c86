//! # Rubric and Report Types
//!
//! The scoring rubric supplied by the host application and the normalized
//! evaluation report handed back to it. These are cross-boundary contracts:
//! field names are camelCase on the wire because the consuming UI treats the
//! payloads as opaque JSON.

use crate::call::transcript::TranscriptEntry;
use serde::{Deserialize, Serialize};

/// One scoring criterion supplied by the host.
///
/// Treated as a read-only contract: the evaluation output must carry the
/// same count, order, names, and maxPoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub max_points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The rubric as the host supplies it: a strict structured list, or freeform
/// text the generator segments itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rubric {
    Structured(Vec<RubricItem>),
    Freeform(String),
}

impl Rubric {
    /// The structured item list, when this rubric has one.
    pub fn structured_items(&self) -> Option<&[RubricItem]> {
        match self {
            Rubric::Structured(items) => Some(items),
            Rubric::Freeform(_) => None,
        }
    }
}

/// A rubric item scored against the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionEvaluation {
    pub name: String,
    pub score: f64,
    pub max_points: f64,
    pub comment: String,
}

/// The normalized, schema-validated evaluation report.
///
/// Always well-typed: generation failures degrade the contents (zero scores,
/// standard summaries) but never the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub agent_name: String,
    /// Percentage in 0..=100.
    pub total_score: f64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_summary: Option<String>,
    pub improvement_suggestions: Vec<String>,
    pub criteria_breakdown: Vec<CriterionEvaluation>,
    pub transcription: Vec<TranscriptEntry>,
}
