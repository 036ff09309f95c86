//! # Simulation Configuration
//!
//! The immutable value object describing one training call: who the trainee
//! is, the scenario being played, the target language and difficulty, the
//! scoring rubric, and free-text persona context for the customer model.
//! Created once per session at start, never mutated.

use crate::eval::rubric::Rubric;
use serde::{Deserialize, Serialize};

/// How hard the AI customer plays the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Behavioral instruction for the system prompt.
    fn persona_instruction(&self) -> &'static str {
        match self {
            Difficulty::Easy => {
                "Be cooperative and patient. Answer questions directly and accept reasonable solutions."
            }
            Difficulty::Medium => {
                "Be mildly frustrated. Push back once or twice before accepting a reasonable solution."
            }
            Difficulty::Hard => {
                "Be upset and demanding. Interrupt, escalate, and only accept a solution that fully addresses your problem."
            }
        }
    }
}

/// Immutable per-session call configuration supplied by the host UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Trainee's name, echoed into the evaluation report.
    pub agent_name: String,
    /// Scenario text the customer model acts out.
    pub scenario: String,
    /// Target language for the whole call (ISO name or code).
    pub language: String,
    pub difficulty: Difficulty,
    /// Scoring rubric, structured or freeform.
    pub rubric: Rubric,
    /// Free-text persona details for the customer model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_context: Option<String>,
}

impl SimulationConfig {
    /// Build the system prompt that opens the streaming session.
    ///
    /// The customer model plays the caller; the trainee plays the agent. The
    /// prompt never mentions scoring — the rubric only exists on the
    /// evaluation path.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are a customer calling a support line, speaking with an agent named {agent}. \
             Stay in character for the entire call and speak only {language}.\n\n\
             Scenario:\n{scenario}\n\n\
             {difficulty}",
            agent = self.agent_name,
            language = self.language,
            scenario = self.scenario.trim(),
            difficulty = self.difficulty.persona_instruction(),
        );

        if let Some(context) = &self.persona_context {
            let context = context.trim();
            if !context.is_empty() {
                prompt.push_str("\n\nAbout you:\n");
                prompt.push_str(context);
            }
        }

        prompt.push_str(
            "\n\nSpeak naturally in short conversational turns. Never reveal that you are an AI \
             or that this is a training exercise.",
        );
        prompt
    }
}
