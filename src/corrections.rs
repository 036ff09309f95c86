//! # Correction Feedback Store
//!
//! When a reviewer edits an AI-generated report, the per-criterion deltas
//! are recorded as worked examples for future evaluation prompts. Purely
//! advisory: the evaluation engine accepts the formatted text as extra
//! context and owes the store nothing else.
//!
//! The store itself is an injected capability (`append` / `recent`) so hosts
//! can choose persistence: in-memory for tests, a JSON-lines file for
//! anything that should survive a restart.

use crate::eval::rubric::EvaluationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Most-recent examples retained by a bounded store.
pub const MAX_EXAMPLES: usize = 50;

/// One human-vs-AI scoring delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionExample {
    pub criterion_name: String,
    pub ai_comment: String,
    pub human_comment: String,
    /// Human score minus AI score.
    pub score_difference: f64,
    pub timestamp: DateTime<Utc>,
}

/// Persistence capability for correction examples.
pub trait CorrectionStore: Send + Sync {
    /// Record one example; the store keeps only the most recent
    /// [`MAX_EXAMPLES`], oldest dropped first.
    fn append(&self, example: CorrectionExample);

    /// The most recent `n` examples, newest last.
    fn recent(&self, n: usize) -> Vec<CorrectionExample>;
}

/// Diff a human-corrected report against the AI original.
///
/// For every criterion present in both breakdowns (matched by name), a
/// differing score or comment yields one example. Identical breakdowns
/// yield none.
pub fn diff_reports(
    original: &EvaluationResult,
    corrected: &EvaluationResult,
) -> Vec<CorrectionExample> {
    let mut examples = Vec::new();

    for ai in &original.criteria_breakdown {
        let human = corrected
            .criteria_breakdown
            .iter()
            .find(|c| c.name == ai.name);
        let human = match human {
            Some(human) => human,
            None => continue,
        };

        if (human.score - ai.score).abs() > f64::EPSILON || human.comment != ai.comment {
            examples.push(CorrectionExample {
                criterion_name: ai.name.clone(),
                ai_comment: ai.comment.clone(),
                human_comment: human.comment.clone(),
                score_difference: human.score - ai.score,
                timestamp: Utc::now(),
            });
        }
    }

    examples
}

/// Render recent examples as prompt context.
///
/// Returns `None` when there is nothing to inject, so callers can skip the
/// section entirely.
pub fn format_examples(examples: &[CorrectionExample]) -> Option<String> {
    if examples.is_empty() {
        return None;
    }

    let mut text = String::from(
        "Past human corrections to AI evaluations (use these to calibrate scoring):\n",
    );
    for example in examples {
        text.push_str(&format!(
            "- {}: the AI said \"{}\" but the reviewer said \"{}\" (score adjusted by {:+})\n",
            example.criterion_name,
            example.ai_comment,
            example.human_comment,
            example.score_difference,
        ));
    }
    Some(text)
}

/// Volatile store for tests and single-run sessions.
pub struct InMemoryCorrectionStore {
    entries: Mutex<VecDeque<CorrectionExample>>,
    capacity: usize,
}

impl InMemoryCorrectionStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_EXAMPLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }
}

impl Default for InMemoryCorrectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionStore for InMemoryCorrectionStore {
    fn append(&self, example: CorrectionExample) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(example);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    fn recent(&self, n: usize) -> Vec<CorrectionExample> {
        let entries = self.entries.lock().unwrap();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }
}

/// JSON-lines file store; loads existing examples at construction and
/// rewrites the file on append so truncation stays simple.
pub struct JsonlCorrectionStore {
    path: PathBuf,
    cache: Mutex<VecDeque<CorrectionExample>>,
    capacity: usize,
}

impl JsonlCorrectionStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = VecDeque::new();

        if let Ok(file) = File::open(&path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                match serde_json::from_str::<CorrectionExample>(&line) {
                    Ok(example) => cache.push_back(example),
                    Err(e) => warn!("skipping unreadable correction line: {}", e),
                }
            }
            while cache.len() > MAX_EXAMPLES {
                cache.pop_front();
            }
        }

        Self {
            path,
            cache: Mutex::new(cache),
            capacity: MAX_EXAMPLES,
        }
    }

    fn persist(&self, entries: &VecDeque<CorrectionExample>) {
        let result = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .and_then(|mut file| {
                for example in entries {
                    // Entries in the cache always serialize.
                    let line = serde_json::to_string(example).unwrap_or_default();
                    writeln!(file, "{}", line)?;
                }
                Ok(())
            });

        if let Err(e) = result {
            warn!("failed to persist correction store: {}", e);
        }
    }
}

impl CorrectionStore for JsonlCorrectionStore {
    fn append(&self, example: CorrectionExample) {
        let mut entries = self.cache.lock().unwrap();
        entries.push_back(example);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.persist(&entries);
    }

    fn recent(&self, n: usize) -> Vec<CorrectionExample> {
        let entries = self.cache.lock().unwrap();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }
}
