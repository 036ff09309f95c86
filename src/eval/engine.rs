//! # Evaluation Engine
//!
//! Turns a finished call transcript plus a scoring rubric into a normalized
//! [`EvaluationResult`] via one structured-output request.
//!
//! ## Two Modes:
//! - **Structured**: the caller supplied explicit rubric items. The response
//!   is reconciled against them — same count, same order, same names, same
//!   maxPoints — with scores clamped and missing items zero-filled, no
//!   matter what the generator actually returned.
//! - **Inferred**: the rubric is freeform text the model segments itself;
//!   the breakdown passes through at whatever cardinality comes back.
//!
//! ## Failure Policy:
//! Every failure on the generation path (network, unparseable JSON, schema
//! drift) is absorbed into a degraded-but-valid result. Callers never see an
//! exception and never need to null-check a partial report.

use crate::call::transcript::{Speaker, TranscriptEntry};
use crate::corrections::{self, CorrectionStore};
use crate::eval::generator::StructuredGenerator;
use crate::eval::rubric::{CriterionEvaluation, EvaluationResult, Rubric, RubricItem};
use crate::simulation::SimulationConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Comment for rubric items the generator never scored.
const NOT_DEMONSTRATED: &str = "Not demonstrated during the call.";
/// Comment for every item when the evaluation itself failed.
const MANUAL_REVIEW: &str = "Manual review required: the automated evaluation did not complete.";
/// Summary for generation failures.
const ERROR_SUMMARY: &str =
    "The evaluation could not be completed automatically. Please review the call manually.";
/// Summary for calls with nothing to evaluate.
const EMPTY_CALL_SUMMARY: &str =
    "No conversation was recorded during this call, so it could not be evaluated.";

/// How many correction examples get injected as prompt context.
const CORRECTION_CONTEXT: usize = 10;

/// What the generator is asked to return. Parsed leniently: every field has
/// a default so a half-conforming response still yields whatever it carried.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GeneratedEvaluation {
    summary: String,
    call_summary: Option<String>,
    improvement_suggestions: Vec<String>,
    total_score: f64,
    criteria_breakdown: Vec<GeneratedCriterion>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GeneratedCriterion {
    name: String,
    score: f64,
    /// Present in responses but never trusted in structured mode.
    max_points: Option<f64>,
    comment: String,
}

/// The evaluation engine. Depends only on the generator and correction-store
/// capabilities, so both are swappable in tests and by hosts.
pub struct EvaluationEngine {
    generator: Arc<dyn StructuredGenerator>,
    corrections: Arc<dyn CorrectionStore>,
}

impl EvaluationEngine {
    pub fn new(generator: Arc<dyn StructuredGenerator>, corrections: Arc<dyn CorrectionStore>) -> Self {
        Self {
            generator,
            corrections,
        }
    }

    /// Evaluate a finished call. Always returns a well-typed result.
    pub async fn evaluate(
        &self,
        config: &SimulationConfig,
        transcript: &[TranscriptEntry],
    ) -> EvaluationResult {
        if transcript.is_empty() {
            debug!("empty transcript, skipping generation");
            return self.degraded(config, transcript, EMPTY_CALL_SUMMARY);
        }

        let prompt = self.build_prompt(config, transcript);
        let schema = build_schema(config.rubric.structured_items());

        let raw = match self.generator.generate(&prompt, Some(&schema)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("generation failed: {}", e);
                return self.degraded(config, transcript, ERROR_SUMMARY);
            }
        };

        let generated: GeneratedEvaluation = match serde_json::from_str(strip_code_fences(&raw)) {
            Ok(generated) => generated,
            Err(e) => {
                warn!("unparseable generation response: {}", e);
                return self.degraded(config, transcript, ERROR_SUMMARY);
            }
        };

        let (criteria_breakdown, total_score) = match config.rubric.structured_items() {
            Some(items) => reconcile(items, &generated.criteria_breakdown),
            None => passthrough(&generated),
        };

        EvaluationResult {
            agent_name: config.agent_name.clone(),
            total_score,
            summary: generated.summary,
            call_summary: generated.call_summary,
            improvement_suggestions: generated.improvement_suggestions,
            criteria_breakdown,
            transcription: transcript.to_vec(),
        }
    }

    /// A complete result with zeroed scores, for every failure path.
    fn degraded(
        &self,
        config: &SimulationConfig,
        transcript: &[TranscriptEntry],
        summary: &str,
    ) -> EvaluationResult {
        let criteria_breakdown = config
            .rubric
            .structured_items()
            .map(|items| {
                items
                    .iter()
                    .map(|item| CriterionEvaluation {
                        name: item.name.clone(),
                        score: 0.0,
                        max_points: item.max_points,
                        comment: MANUAL_REVIEW.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        EvaluationResult {
            agent_name: config.agent_name.clone(),
            total_score: 0.0,
            summary: summary.to_string(),
            call_summary: None,
            improvement_suggestions: Vec::new(),
            criteria_breakdown,
            transcription: transcript.to_vec(),
        }
    }

    fn build_prompt(&self, config: &SimulationConfig, transcript: &[TranscriptEntry]) -> String {
        let mut prompt = format!(
            "You are grading a call-center training session. The agent {agent} handled a \
             simulated customer call in {language}.\n\nScenario:\n{scenario}\n\n",
            agent = config.agent_name,
            language = config.language,
            scenario = config.scenario.trim(),
        );

        prompt.push_str("Transcript:\n");
        for entry in transcript {
            let who = match entry.speaker {
                Speaker::Agent => "Agent",
                Speaker::Customer => "Customer",
            };
            prompt.push_str(&format!("{}: {}\n", who, entry.text));
        }

        match &config.rubric {
            Rubric::Structured(items) => {
                prompt.push_str(
                    "\nScore the agent against exactly these criteria, one breakdown entry \
                     per criterion, in this order:\n",
                );
                for (i, item) in items.iter().enumerate() {
                    prompt.push_str(&format!(
                        "{}. {} (max {} points){}\n",
                        i + 1,
                        item.name,
                        item.max_points,
                        item.description
                            .as_deref()
                            .map(|d| format!(": {}", d))
                            .unwrap_or_default(),
                    ));
                }
            }
            Rubric::Freeform(text) => {
                prompt.push_str(
                    "\nDerive scoring criteria from the following rubric description and score \
                     the agent against them:\n",
                );
                prompt.push_str(text.trim());
                prompt.push('\n');
            }
        }

        let examples = self.corrections.recent(CORRECTION_CONTEXT);
        if let Some(context) = corrections::format_examples(&examples) {
            prompt.push('\n');
            prompt.push_str(&context);
        }

        prompt.push_str(
            "\nReturn a JSON object with: summary, callSummary, improvementSuggestions \
             (array of strings), totalScore (0-100), and criteriaBreakdown (array of \
             {name, score, maxPoints, comment}).",
        );
        prompt
    }
}

/// Strict-mode reconciliation.
///
/// ## Matching:
/// 1. The entry at the same position, when its name matches
/// 2. Any unclaimed entry with a matching name
/// 3. The unclaimed positional entry, but only when the response has the
///    rubric's exact cardinality (covers misnamed same-shape responses)
/// 4. Zero-fill with the standard comment
///
/// Scores are clamped to `[0, maxPoints]` of the *original* item; the
/// response's own maxPoints is never trusted. The returned breakdown always
/// has the rubric's cardinality and order, and the total is recomputed from
/// the clamped scores.
fn reconcile(
    items: &[RubricItem],
    generated: &[GeneratedCriterion],
) -> (Vec<CriterionEvaluation>, f64) {
    let normalize = |name: &str| name.trim().to_lowercase();
    let mut claimed = vec![false; generated.len()];
    let mut assigned: Vec<Option<usize>> = vec![None; items.len()];

    // Pass 1: positional entries whose names agree.
    for (idx, item) in items.iter().enumerate() {
        if let Some(candidate) = generated.get(idx) {
            if !claimed[idx] && normalize(&candidate.name) == normalize(&item.name) {
                assigned[idx] = Some(idx);
                claimed[idx] = true;
            }
        }
    }

    // Pass 2: name match anywhere in the response.
    for (idx, item) in items.iter().enumerate() {
        if assigned[idx].is_some() {
            continue;
        }
        let found = generated
            .iter()
            .enumerate()
            .find(|(g, candidate)| !claimed[*g] && normalize(&candidate.name) == normalize(&item.name));
        if let Some((g, _)) = found {
            assigned[idx] = Some(g);
            claimed[g] = true;
        }
    }

    // Pass 3: positional fallback, only when cardinality agrees.
    if generated.len() == items.len() {
        for (idx, slot) in assigned.iter_mut().enumerate() {
            if slot.is_none() && !claimed[idx] {
                *slot = Some(idx);
                claimed[idx] = true;
            }
        }
    }

    let mut earned = 0.0;
    let mut max = 0.0;
    let breakdown: Vec<CriterionEvaluation> = items
        .iter()
        .zip(assigned.iter())
        .map(|(item, slot)| {
            let (score, comment) = match slot.map(|g| &generated[g]) {
                Some(entry) => (
                    entry.score.clamp(0.0, item.max_points),
                    entry.comment.clone(),
                ),
                None => (0.0, NOT_DEMONSTRATED.to_string()),
            };
            earned += score;
            max += item.max_points;
            CriterionEvaluation {
                name: item.name.clone(),
                score,
                max_points: item.max_points,
                comment,
            }
        })
        .collect();

    // Earned and max are locally known and authoritative; the generator's
    // own percentage is ignored in structured mode.
    let total = if max > 0.0 {
        (100.0 * earned / max).round()
    } else {
        0.0
    };

    (breakdown, total)
}

/// Inferred-mode passthrough: whatever cardinality came back, with each
/// score clamped to the entry's own claimed maxPoints and the total clamped
/// to 0..=100.
fn passthrough(generated: &GeneratedEvaluation) -> (Vec<CriterionEvaluation>, f64) {
    let breakdown = generated
        .criteria_breakdown
        .iter()
        .map(|entry| {
            let max_points = entry.max_points.unwrap_or(entry.score.max(0.0)).max(0.0);
            CriterionEvaluation {
                name: entry.name.clone(),
                score: entry.score.clamp(0.0, max_points),
                max_points,
                comment: entry.comment.clone(),
            }
        })
        .collect();

    (breakdown, generated.total_score.clamp(0.0, 100.0))
}

/// JSON schema for the structured-generation request. With a structured
/// rubric the breakdown cardinality is pinned to the rubric's.
fn build_schema(items: Option<&[RubricItem]>) -> Value {
    let mut breakdown = json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "score": { "type": "number" },
                "maxPoints": { "type": "number" },
                "comment": { "type": "string" }
            },
            "required": ["name", "score", "comment"]
        }
    });

    if let Some(items) = items {
        breakdown["minItems"] = json!(items.len());
        breakdown["maxItems"] = json!(items.len());
    }

    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "callSummary": { "type": "string" },
            "improvementSuggestions": { "type": "array", "items": { "type": "string" } },
            "totalScore": { "type": "number", "minimum": 0, "maximum": 100 },
            "criteriaBreakdown": breakdown
        },
        "required": ["summary", "improvementSuggestions", "totalScore", "criteriaBreakdown"]
    })
}

/// Models sometimes wrap JSON in markdown fences despite the schema hint.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{CorrectionExample, InMemoryCorrectionStore};
    use crate::error::{AppError, AppResult};
    use crate::simulation::Difficulty;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Generator that replays a scripted response and records the prompt.
    struct ScriptedGenerator {
        response: AppResult<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn ok(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(AppError::Generation("connection reset".to_string())),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl StructuredGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _schema: Option<&Value>) -> AppResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(AppError::Generation(msg)) => Err(AppError::Generation(msg.clone())),
                Err(_) => Err(AppError::Generation("scripted".to_string())),
            }
        }
    }

    fn rubric_config(items: Vec<(&str, f64)>) -> SimulationConfig {
        SimulationConfig {
            agent_name: "Dana".to_string(),
            scenario: "Billing dispute".to_string(),
            language: "English".to_string(),
            difficulty: Difficulty::Medium,
            rubric: Rubric::Structured(
                items
                    .into_iter()
                    .map(|(name, max_points)| RubricItem {
                        id: None,
                        name: name.to_string(),
                        max_points,
                        description: None,
                    })
                    .collect(),
            ),
            persona_context: None,
        }
    }

    fn freeform_config() -> SimulationConfig {
        SimulationConfig {
            rubric: Rubric::Freeform("grade politeness and accuracy".to_string()),
            ..rubric_config(vec![])
        }
    }

    fn transcript() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry {
                speaker: Speaker::Agent,
                text: "Hello, how can I help?".to_string(),
            },
            TranscriptEntry {
                speaker: Speaker::Customer,
                text: "You charged me twice.".to_string(),
            },
        ]
    }

    fn engine(generator: Arc<ScriptedGenerator>) -> EvaluationEngine {
        EvaluationEngine::new(generator, Arc::new(InMemoryCorrectionStore::new()))
    }

    #[tokio::test]
    async fn test_missing_item_zero_filled_and_score_clamped() {
        // Only Closing comes back, and over-scored at that.
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"decent","improvementSuggestions":[],"totalScore":90,
                "criteriaBreakdown":[{"name":"Closing","score":15,"comment":"ok"}]}"#,
        ));
        let config = rubric_config(vec![("Greeting", 10.0), ("Closing", 10.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;

        assert_eq!(result.criteria_breakdown.len(), 2);
        let greeting = &result.criteria_breakdown[0];
        assert_eq!(greeting.name, "Greeting");
        assert_eq!(greeting.score, 0.0);
        assert_eq!(greeting.max_points, 10.0);
        assert_eq!(greeting.comment, NOT_DEMONSTRATED);

        let closing = &result.criteria_breakdown[1];
        assert_eq!(closing.name, "Closing");
        assert_eq!(closing.score, 10.0); // clamped from 15
        assert_eq!(closing.comment, "ok");

        assert_eq!(result.total_score, 50.0);
    }

    #[tokio::test]
    async fn test_cardinality_holds_against_extra_and_reordered_items() {
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"s","improvementSuggestions":[],"totalScore":10,
                "criteriaBreakdown":[
                    {"name":"Invented","score":9,"comment":"?"},
                    {"name":"closing","score":4,"comment":"rushed"},
                    {"name":"Greeting","score":-3,"maxPoints":99,"comment":"cold"}
                ]}"#,
        ));
        let config = rubric_config(vec![("Greeting", 10.0), ("Closing", 5.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;

        assert_eq!(result.criteria_breakdown.len(), 2);
        // Name matching is case-insensitive; scores clamp to the original
        // item's bounds, never the response's claimed maxPoints.
        assert_eq!(result.criteria_breakdown[0].name, "Greeting");
        assert_eq!(result.criteria_breakdown[0].score, 0.0); // clamped from -3
        assert_eq!(result.criteria_breakdown[0].max_points, 10.0);
        assert_eq!(result.criteria_breakdown[1].score, 4.0);
        // 4 of 15 earned.
        assert_eq!(result.total_score, 27.0);
    }

    #[tokio::test]
    async fn test_misnamed_same_cardinality_response_matches_positionally() {
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"s","improvementSuggestions":[],"totalScore":50,
                "criteriaBreakdown":[
                    {"name":"Criterion 1","score":5,"comment":"a"},
                    {"name":"Criterion 2","score":5,"comment":"b"}
                ]}"#,
        ));
        let config = rubric_config(vec![("Greeting", 10.0), ("Closing", 10.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;

        assert_eq!(result.criteria_breakdown[0].name, "Greeting");
        assert_eq!(result.criteria_breakdown[0].score, 5.0);
        assert_eq!(result.criteria_breakdown[0].comment, "a");
        assert_eq!(result.criteria_breakdown[1].comment, "b");
    }

    #[tokio::test]
    async fn test_recomputed_total_overrides_generator_percentage() {
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"s","improvementSuggestions":[],"totalScore":3,
                "criteriaBreakdown":[{"name":"Greeting","score":10,"comment":"warm"}]}"#,
        ));
        let config = rubric_config(vec![("Greeting", 10.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;
        assert_eq!(result.total_score, 100.0);
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_manual_review() {
        let generator = Arc::new(ScriptedGenerator::failing());
        let config = rubric_config(vec![("Greeting", 10.0), ("Closing", 5.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;

        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.summary, ERROR_SUMMARY);
        assert_eq!(result.criteria_breakdown.len(), 2);
        assert!(result
            .criteria_breakdown
            .iter()
            .all(|c| c.score == 0.0 && c.comment == MANUAL_REVIEW));
        assert_eq!(result.transcription.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_response_degrades() {
        let generator = Arc::new(ScriptedGenerator::ok("I think the agent did great!"));
        let config = rubric_config(vec![("Greeting", 10.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;
        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.summary, ERROR_SUMMARY);
        assert_eq!(result.criteria_breakdown.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcript_returns_without_remote_call() {
        let generator = Arc::new(ScriptedGenerator::ok("{}"));
        let config = rubric_config(vec![("Greeting", 10.0)]);

        let result = engine(generator.clone()).evaluate(&config, &[]).await;

        assert_eq!(generator.calls(), 0);
        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.summary, EMPTY_CALL_SUMMARY);
        assert!(result.transcription.is_empty());
    }

    #[tokio::test]
    async fn test_inferred_mode_passes_breakdown_through() {
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"solid","improvementSuggestions":["slow down"],"totalScore":140,
                "criteriaBreakdown":[
                    {"name":"Tone","score":8,"maxPoints":10,"comment":"good"},
                    {"name":"Accuracy","score":12,"maxPoints":10,"comment":"overreach"},
                    {"name":"Pace","score":3,"maxPoints":5,"comment":"rushed"}
                ]}"#,
        ));

        let result = engine(generator)
            .evaluate(&freeform_config(), &transcript())
            .await;

        // Variable cardinality is allowed; per-entry scores clamp to the
        // entry's own maxPoints and the percentage clamps to 100.
        assert_eq!(result.criteria_breakdown.len(), 3);
        assert_eq!(result.criteria_breakdown[1].score, 10.0);
        assert_eq!(result.total_score, 100.0);
        assert_eq!(result.improvement_suggestions, vec!["slow down"]);
    }

    #[tokio::test]
    async fn test_code_fenced_response_still_parses() {
        let generator = Arc::new(ScriptedGenerator::ok(
            "```json\n{\"summary\":\"s\",\"improvementSuggestions\":[],\"totalScore\":0,\
             \"criteriaBreakdown\":[{\"name\":\"Greeting\",\"score\":5,\"comment\":\"x\"}]}\n```",
        ));
        let config = rubric_config(vec![("Greeting", 10.0)]);

        let result = engine(generator).evaluate(&config, &transcript()).await;
        assert_eq!(result.criteria_breakdown[0].score, 5.0);
        assert_eq!(result.total_score, 50.0);
    }

    #[tokio::test]
    async fn test_correction_examples_reach_the_prompt() {
        let generator = Arc::new(ScriptedGenerator::ok(
            r#"{"summary":"s","improvementSuggestions":[],"totalScore":0,"criteriaBreakdown":[]}"#,
        ));
        let store = Arc::new(InMemoryCorrectionStore::new());
        store.append(CorrectionExample {
            criterion_name: "Empathy".to_string(),
            ai_comment: "flat".to_string(),
            human_comment: "showed warmth".to_string(),
            score_difference: 3.0,
            timestamp: Utc::now(),
        });

        let engine = EvaluationEngine::new(generator.clone(), store);
        engine
            .evaluate(&rubric_config(vec![("Greeting", 10.0)]), &transcript())
            .await;

        let prompt = generator.last_prompt();
        assert!(prompt.contains("Empathy"));
        assert!(prompt.contains("showed warmth"));
    }
}
