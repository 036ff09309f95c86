//! # Evaluation Module
//!
//! Post-call scoring: rubric types, the structured-generation client, and
//! the engine that reconciles generated reports against the rubric.

pub mod engine;     // Reconciliation and failure policy
pub mod generator;  // Structured-output HTTP client
pub mod rubric;     // Rubric and report types
