//! # Transcript Accumulator
//!
//! Merges the streamed partial-text events of a live call into discrete,
//! ordered transcript entries.
//!
//! ## Turn Model:
//! The streaming model emits text deltas per speaker with no boundaries of
//! its own; a separate turn-complete event closes whatever has accumulated.
//! Entries land in the order their owning turn completed, so either side may
//! have consecutive entries — strict alternation is not assumed.

use serde::{Deserialize, Serialize};

/// Which party spoke a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The trainee on the call.
    Agent,
    /// The AI-played customer.
    Customer,
}

/// One completed speaking turn.
///
/// Append-only during a call; immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Accumulates partial text per speaker and cuts entries at turn boundaries.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    agent_partial: String,
    customer_partial: String,
    entries: Vec<TranscriptEntry>,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a streamed text delta to a speaker's open turn.
    pub fn push_partial(&mut self, speaker: Speaker, delta: &str) {
        match speaker {
            Speaker::Agent => self.agent_partial.push_str(delta),
            Speaker::Customer => self.customer_partial.push_str(delta),
        }
    }

    /// Close the current turn.
    ///
    /// Each buffer with non-empty trimmed content becomes an entry (agent
    /// first — within a turn the trainee's speech precedes the reply), then
    /// both buffers clear.
    ///
    /// ## Returns:
    /// The entries appended by this boundary, in order.
    pub fn complete_turn(&mut self) -> Vec<TranscriptEntry> {
        let mut appended = Vec::new();

        for (speaker, partial) in [
            (Speaker::Agent, &mut self.agent_partial),
            (Speaker::Customer, &mut self.customer_partial),
        ] {
            let trimmed = partial.trim();
            if !trimmed.is_empty() {
                let entry = TranscriptEntry {
                    speaker,
                    text: trimmed.to_string(),
                };
                self.entries.push(entry.clone());
                appended.push(entry);
            }
            partial.clear();
        }

        appended
    }

    /// Teardown flush: close any open turn so speech is never dropped when a
    /// call ends mid-turn. Same semantics as [`complete_turn`].
    pub fn flush(&mut self) -> Vec<TranscriptEntry> {
        self.complete_turn()
    }

    /// Entries committed so far, in turn-completion order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Consume the accumulator and hand out the final transcript.
    pub fn into_entries(mut self) -> Vec<TranscriptEntry> {
        self.flush();
        self.entries
    }

    /// Whether either speaker has an open (uncommitted) turn.
    pub fn has_pending(&self) -> bool {
        !self.agent_partial.trim().is_empty() || !self.customer_partial.trim().is_empty()
    }

    /// Session reset: drop everything, including committed entries.
    pub fn reset(&mut self) {
        self.agent_partial.clear();
        self.customer_partial.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_merge_until_turn_completes() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Agent, "Hello, thank you ");
        acc.push_partial(Speaker::Agent, "for calling.");
        assert!(acc.entries().is_empty());

        let appended = acc.complete_turn();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].speaker, Speaker::Agent);
        assert_eq!(appended[0].text, "Hello, thank you for calling.");
    }

    #[test]
    fn test_turn_with_both_speakers_appends_agent_first() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Customer, "My internet is down.");
        acc.push_partial(Speaker::Agent, "How can I help?");

        let appended = acc.complete_turn();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].speaker, Speaker::Agent);
        assert_eq!(appended[1].speaker, Speaker::Customer);
    }

    #[test]
    fn test_empty_or_whitespace_buffers_produce_no_entries() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Agent, "   \n");
        assert!(acc.complete_turn().is_empty());
        assert!(acc.entries().is_empty());
    }

    #[test]
    fn test_consecutive_turns_by_one_speaker_are_allowed() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Customer, "Hello?");
        acc.complete_turn();
        acc.push_partial(Speaker::Customer, "Is anyone there?");
        acc.complete_turn();

        let entries = acc.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.speaker == Speaker::Customer));
    }

    #[test]
    fn test_flush_on_teardown_keeps_pending_speech() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Agent, "One last thi");
        assert!(acc.has_pending());

        let entries = acc.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "One last thi");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut acc = TranscriptAccumulator::new();

        acc.push_partial(Speaker::Agent, "Hi");
        acc.complete_turn();
        acc.push_partial(Speaker::Customer, "pending");
        acc.reset();

        assert!(acc.entries().is_empty());
        assert!(!acc.has_pending());
    }
}
