//! # Memory Extractor (spec.md §4.3)
//!
//! LLM-driven extraction of memory candidates from raw dialogue. The
//! contract is strict about failure: malformed JSON, transport errors, or
//! empty dialogue are all "no extraction", never an `Err`.

use rmm_core::llm::{Prompt, oneshot};
use rmm_core::LanguageModel;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Literal marker the extractor returns when no durable fact is worth
/// remembering.
pub const NO_TRAIT_MARKER: &str = "NO_TRAIT";

/// One candidate memory surfaced by the extractor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MemoryCandidate {
    /// Natural-language summary of the durable fact.
    pub summary: String,
    /// Ordered turn indices that contributed to this candidate.
    pub reference: Vec<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractionPayload {
    extracted_memories: Vec<MemoryCandidate>,
}

/// Extracts zero or more candidate memories from raw dialogue.
pub trait MemoryExtractor: Send + Sync {
    /// `dialogue` is already concatenated by the caller using its own
    /// speaker-formatting convention.
    fn extract(
        &self,
        dialogue: &str,
    ) -> impl std::future::Future<Output = Vec<MemoryCandidate>> + Send;
}

/// Default extractor: asks an LLM collaborator for either the
/// [`NO_TRAIT_MARKER`] or a JSON `{ "extracted_memories": [...] }` payload.
pub struct LlmMemoryExtractor<'a, LLM> {
    llm: &'a LLM,
    instructions: &'a str,
}

impl<'a, LLM> LlmMemoryExtractor<'a, LLM>
where
    LLM: LanguageModel,
{
    #[must_use]
    pub fn new(llm: &'a LLM, instructions: &'a str) -> Self {
        Self { llm, instructions }
    }

    fn prompt(&self, dialogue: &str) -> Prompt {
        oneshot(
            "You are a precision memory extractor. Only emit durable, factual \
             memories. If the dialogue contains nothing worth remembering, \
             respond with exactly the text NO_TRAIT and nothing else. \
             Otherwise respond with JSON matching \
             {\"extracted_memories\": [{\"summary\": string, \"reference\": [int, ...]}]}.",
            format!(
                "Instructions: {instructions}\n\nDialogue:\n{dialogue}",
                instructions = self.instructions
            ),
        )
    }
}

impl<LLM> MemoryExtractor for LlmMemoryExtractor<'_, LLM>
where
    LLM: LanguageModel,
{
    async fn extract(&self, dialogue: &str) -> Vec<MemoryCandidate> {
        if dialogue.trim().is_empty() {
            return Vec::new();
        }

        let response = match self.llm.invoke(self.prompt(dialogue)).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "memory extraction LLM call failed, treating as NO_TRAIT");
                return Vec::new();
            }
        };

        let trimmed = response.trim();
        if trimmed == NO_TRAIT_MARKER || trimmed.is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<ExtractionPayload>(trimmed) {
            Ok(payload) => payload
                .extracted_memories
                .into_iter()
                .filter(|c| !c.summary.trim().is_empty())
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, response = trimmed, "malformed extraction response, treating as NO_TRAIT");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedLlm {
        response: String,
    }

    impl LanguageModel for ScriptedLlm {
        async fn invoke(&self, _prompt: Prompt) -> rmm_core::Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingLlm;

    impl LanguageModel for FailingLlm {
        async fn invoke(&self, _prompt: Prompt) -> rmm_core::Result<String> {
            anyhow::bail!("transport error")
        }
    }

    #[tokio::test]
    async fn no_trait_marker_yields_empty() {
        let llm = ScriptedLlm {
            response: "NO_TRAIT".into(),
        };
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        assert!(extractor.extract("hi, how are you?").await.is_empty());
    }

    #[tokio::test]
    async fn valid_json_is_parsed() {
        let llm = ScriptedLlm {
            response: r#"{"extracted_memories": [{"summary": "User enjoys hiking", "reference": [0, 1]}]}"#.into(),
        };
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        let candidates = extractor.extract("I love hiking").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].summary, "User enjoys hiking");
        assert_eq!(candidates[0].reference, vec![0, 1]);
    }

    #[tokio::test]
    async fn malformed_json_yields_empty() {
        let llm = ScriptedLlm {
            response: "{not valid json".into(),
        };
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        assert!(extractor.extract("I love hiking").await.is_empty());
    }

    #[tokio::test]
    async fn empty_dialogue_short_circuits_without_calling_llm() {
        let llm = FailingLlm;
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        assert!(extractor.extract("   ").await.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_yields_empty() {
        let llm = FailingLlm;
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        assert!(extractor.extract("I love hiking").await.is_empty());
    }

    #[tokio::test]
    async fn blank_summary_candidates_are_filtered() {
        let llm = ScriptedLlm {
            response: r#"{"extracted_memories": [{"summary": "  ", "reference": []}, {"summary": "real fact", "reference": [0]}]}"#.into(),
        };
        let extractor = LlmMemoryExtractor::new(&llm, "extract facts");
        let candidates = extractor.extract("dialogue").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].summary, "real fact");
    }
}
