//! # Merge/Add Decider (spec.md §4.4)
//!
//! Given one new candidate memory and its top-K nearest existing memories,
//! asks an LLM collaborator to decide whether to add the candidate fresh or
//! merge it into an existing memory. Parsing is strict: any unparseable
//! response, or an out-of-range merge target, degrades to `ADD`.

use rmm_core::LanguageModel;
use rmm_core::llm::oneshot;
use serde::Deserialize;

use crate::extractor::MemoryCandidate;
use crate::vector_store::SearchHit;

/// The decision returned for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// Insert the candidate as a new memory.
    Add,
    /// Rewrite the existing memory at `index` (into the similar-memories
    /// slice passed to [`MergeAddDecider::decide`]) with `new_summary`.
    Merge { index: usize, new_summary: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawAction {
    Add,
    Merge,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: RawAction,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    new_summary: Option<String>,
}

/// Decides, per candidate, whether to merge it into an existing memory or
/// insert it fresh.
pub trait MergeAddDecider: Send + Sync {
    fn decide(
        &self,
        candidate: &MemoryCandidate,
        similar: &[SearchHit],
    ) -> impl std::future::Future<Output = MergeDecision> + Send;
}

/// Default decider: asks an LLM collaborator for a JSON decision object.
pub struct LlmMergeAddDecider<'a, LLM> {
    llm: &'a LLM,
    instructions: &'a str,
}

impl<'a, LLM> LlmMergeAddDecider<'a, LLM>
where
    LLM: LanguageModel,
{
    #[must_use]
    pub fn new(llm: &'a LLM, instructions: &'a str) -> Self {
        Self { llm, instructions }
    }
}

impl<LLM> MergeAddDecider for LlmMergeAddDecider<'_, LLM>
where
    LLM: LanguageModel,
{
    async fn decide(&self, candidate: &MemoryCandidate, similar: &[SearchHit]) -> MergeDecision {
        if similar.is_empty() {
            return MergeDecision::Add;
        }

        let similar_json = similar
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("{{\"index\": {i}, \"summary\": {:?}}}", hit.page_content))
            .collect::<Vec<_>>()
            .join(",\n");

        let prompt = oneshot(
            "You maintain a consistent memory database. Respond with JSON \
             matching {\"action\": \"add\"} or \
             {\"action\": \"merge\", \"index\": int, \"new_summary\": string}.",
            format!(
                "{instructions}\n\nCandidate memory:\n{candidate}\n\n\
                 Similar memories (descending similarity):\n[{similar_json}]",
                instructions = self.instructions,
                candidate = candidate.summary,
            ),
        );

        let response = match self.llm.invoke(prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "merge/add decision LLM call failed, defaulting to ADD");
                return MergeDecision::Add;
            }
        };

        parse_decision(response.trim(), similar.len())
    }
}

fn parse_decision(raw: &str, similar_count: usize) -> MergeDecision {
    let Ok(decision) = serde_json::from_str::<RawDecision>(raw) else {
        tracing::warn!(response = raw, "unparseable merge/add decision, defaulting to ADD");
        return MergeDecision::Add;
    };

    match decision.action {
        RawAction::Add => MergeDecision::Add,
        RawAction::Merge => {
            let (Some(index), Some(new_summary)) = (decision.index, decision.new_summary) else {
                return MergeDecision::Add;
            };
            if index >= similar_count {
                tracing::warn!(index, similar_count, "merge target out of range, defaulting to ADD");
                return MergeDecision::Add;
            }
            MergeDecision::Merge { index, new_summary }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmm_core::llm::Prompt;
    use std::collections::BTreeMap;

    struct ScriptedLlm {
        response: String,
    }

    impl LanguageModel for ScriptedLlm {
        async fn invoke(&self, _prompt: Prompt) -> rmm_core::Result<String> {
            Ok(self.response.clone())
        }
    }

    fn hit(content: &str) -> SearchHit {
        SearchHit {
            page_content: content.into(),
            metadata: BTreeMap::new(),
            score: None,
        }
    }

    fn candidate(summary: &str) -> MemoryCandidate {
        MemoryCandidate {
            summary: summary.into(),
            reference: vec![0],
        }
    }

    #[tokio::test]
    async fn no_similar_memories_always_adds() {
        let llm = ScriptedLlm {
            response: r#"{"action": "merge", "index": 0, "new_summary": "x"}"#.into(),
        };
        let decider = LlmMergeAddDecider::new(&llm, "merge instructions");
        let decision = decider.decide(&candidate("User likes tea"), &[]).await;
        assert_eq!(decision, MergeDecision::Add);
    }

    #[tokio::test]
    async fn valid_merge_is_applied() {
        let llm = ScriptedLlm {
            response: r#"{"action": "merge", "index": 0, "new_summary": "User enjoys hiking and trails"}"#.into(),
        };
        let decider = LlmMergeAddDecider::new(&llm, "merge instructions");
        let decision = decider
            .decide(&candidate("User enjoys hiking"), &[hit("User likes trails")])
            .await;
        assert_eq!(
            decision,
            MergeDecision::Merge {
                index: 0,
                new_summary: "User enjoys hiking and trails".into()
            }
        );
    }

    #[tokio::test]
    async fn out_of_range_index_defaults_to_add() {
        let llm = ScriptedLlm {
            response: r#"{"action": "merge", "index": 5, "new_summary": "x"}"#.into(),
        };
        let decider = LlmMergeAddDecider::new(&llm, "merge instructions");
        let decision = decider
            .decide(&candidate("User likes tea"), &[hit("User likes coffee")])
            .await;
        assert_eq!(decision, MergeDecision::Add);
    }

    #[tokio::test]
    async fn malformed_response_defaults_to_add() {
        let llm = ScriptedLlm {
            response: "not json at all".into(),
        };
        let decider = LlmMergeAddDecider::new(&llm, "merge instructions");
        let decision = decider
            .decide(&candidate("User likes tea"), &[hit("User likes coffee")])
            .await;
        assert_eq!(decision, MergeDecision::Add);
    }
}
