//! # Citation Scorer (spec.md §4.7)
//!
//! Inspects the assistant's response text and decides, for each memory
//! surfaced to the LLM this turn, whether the response cited it. Kept
//! deliberately simple and replaceable: a memory is cited if its id, its
//! summary under a fuzzy substring/word-overlap threshold, or an explicit
//! citation marker appears in the response.

use crate::types::{CitationRecord, RetrievedMemory};

/// Emits one [`CitationRecord`] per selected memory for a turn.
pub trait CitationScorer: Send + Sync {
    /// `retrieved` is `TurnContext::retrieved_memories` for the turn;
    /// `turn_index` is the session-local turn counter.
    fn score(&self, response: &str, turn_index: usize, retrieved: &[RetrievedMemory]) -> Vec<CitationRecord>;
}

/// Default scorer: id match, explicit `[[memory:ID]]` marker, exact summary
/// containment, or a word-overlap ratio at or above `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct SubstringCitationScorer {
    /// Minimum fraction of a summary's significant words (length > 3) that
    /// must appear in the response for a fuzzy match to count as a citation.
    pub threshold: f32,
}

impl Default for SubstringCitationScorer {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

impl SubstringCitationScorer {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    fn is_cited(&self, response_lower: &str, memory: &RetrievedMemory) -> bool {
        if response_lower.contains(&memory.entry.id.to_lowercase()) {
            return true;
        }
        let marker = format!("[[memory:{}]]", memory.entry.id).to_lowercase();
        if response_lower.contains(&marker) {
            return true;
        }
        let summary = memory.entry.topic_summary.trim();
        if summary.is_empty() {
            return false;
        }
        if response_lower.contains(&summary.to_lowercase()) {
            return true;
        }
        word_overlap_ratio(summary, response_lower) >= self.threshold
    }
}

impl CitationScorer for SubstringCitationScorer {
    fn score(&self, response: &str, turn_index: usize, retrieved: &[RetrievedMemory]) -> Vec<CitationRecord> {
        let response_lower = response.to_lowercase();
        retrieved
            .iter()
            .enumerate()
            .map(|(memory_index, memory)| {
                let cited = self.is_cited(&response_lower, memory);
                CitationRecord::with_default_reward(memory_index, turn_index, cited)
            })
            .collect()
    }
}

/// Fraction of `summary`'s significant words (length > 3) found verbatim in
/// `response_lower`, which must already be lowercased.
fn word_overlap_ratio(summary: &str, response_lower: &str) -> f32 {
    let words: Vec<&str> = summary
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() > 3)
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let matched = words
        .iter()
        .filter(|w| response_lower.contains(&w.to_lowercase()))
        .count();
    matched as f32 / words.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryEntry;

    fn memory(id: &str, summary: &str) -> RetrievedMemory {
        RetrievedMemory {
            entry: MemoryEntry {
                id: id.into(),
                session_id: "s1".into(),
                topic_summary: summary.into(),
                raw_dialogue: String::new(),
                timestamp: 0,
                turn_references: vec![0],
            },
            embedding: vec![1.0, 0.0],
            relevance_score: None,
        }
    }

    #[test]
    fn id_match_is_cited() {
        let scorer = SubstringCitationScorer::default();
        let mems = vec![memory("mem-42", "user enjoys hiking")];
        let records = scorer.score("As noted in mem-42, you like the outdoors.", 3, &mems);
        assert!(records[0].cited);
        assert!((records[0].reward - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn exact_summary_containment_is_cited() {
        let scorer = SubstringCitationScorer::default();
        let mems = vec![memory("mem-1", "user enjoys hiking")];
        let records = scorer.score("Since the user enjoys hiking, I suggest a trail.", 0, &mems);
        assert!(records[0].cited);
    }

    #[test]
    fn unrelated_response_is_uncited() {
        let scorer = SubstringCitationScorer::default();
        let mems = vec![memory("mem-1", "user enjoys hiking")];
        let records = scorer.score("Here is today's weather forecast.", 0, &mems);
        assert!(!records[0].cited);
        assert!((records[0].reward - (-1.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn marker_match_is_cited() {
        let scorer = SubstringCitationScorer::default();
        let mems = vec![memory("abc", "user likes tea")];
        let records = scorer.score("Good morning! [[memory:abc]]", 0, &mems);
        assert!(records[0].cited);
    }

    #[test]
    fn scores_one_record_per_retrieved_memory() {
        let scorer = SubstringCitationScorer::default();
        let mems = vec![memory("m1", "user likes tea"), memory("m2", "user likes coffee")];
        let records = scorer.score("unrelated text", 1, &mems);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].memory_index, 0);
        assert_eq!(records[1].memory_index, 1);
    }
}
