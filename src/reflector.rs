//! # Prospective Reflector (spec.md §4.5)
//!
//! Runs at session end (`afterAgent`): digests the buffered raw dialogue
//! into candidate memory summaries, then asks the merge/add decider what
//! to do with each candidate. The staging discipline (copy the live buffer
//! before any asynchronous work, clear it only on success) is the crash
//! safety mechanism spec.md §5 calls out by name — a reflection that dies
//! partway leaves the staging slot intact so the next boot can replay it.

use rmm_core::{EmbeddingModel, LanguageModel};

use crate::decider::{LlmMergeAddDecider, MergeAddDecider, MergeDecision};
use crate::extractor::{LlmMemoryExtractor, MemoryExtractor};
use crate::persistence::{
    PersistenceStore, clear_staging_buffer, load_message_buffer, save_staging_buffer,
};
use crate::types::{MemoryEntry, MessageBuffer};
use crate::vector_store::{Document, VectorStoreFacade};

/// Explicit, typed configuration for one reflection pass: the two LLM
/// collaborators' prompt instruction text plus the similarity breadth used
/// to find merge candidates. Bundled the way `RerankerConfig` bundles the
/// retriever's scalars, rather than threading bare strings through
/// `reflect`'s parameter list.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Extra instruction text appended to the extractor's system prompt.
    pub extraction_instructions: String,
    /// Extra instruction text appended to the decider's system prompt.
    pub decision_instructions: String,
    /// How many existing memories to compare each candidate against
    /// (spec.md §4.5 step 4's "similarity-search vector store").
    pub similar_k: usize,
}

impl ReflectorConfig {
    /// Builds a config with the given instruction texts and the
    /// spec-suggested default similarity breadth of 5.
    #[must_use]
    pub fn new(extraction_instructions: impl Into<String>, decision_instructions: impl Into<String>) -> Self {
        Self {
            extraction_instructions: extraction_instructions.into(),
            decision_instructions: decision_instructions.into(),
            similar_k: 5,
        }
    }

    #[must_use]
    pub fn with_similar_k(mut self, value: usize) -> Self {
        self.similar_k = value.max(1);
        self
    }
}

/// Builds the default LLM-backed extractor/decider pair from one
/// `ReflectorConfig`, for callers happy with the spec's reference
/// collaborators rather than a bespoke `MemoryExtractor`/`MergeAddDecider`.
#[must_use]
pub fn default_collaborators<'a, LLM>(llm: &'a LLM, config: &'a ReflectorConfig) -> (LlmMemoryExtractor<'a, LLM>, LlmMergeAddDecider<'a, LLM>)
where
    LLM: LanguageModel,
{
    (
        LlmMemoryExtractor::new(llm, &config.extraction_instructions),
        LlmMergeAddDecider::new(llm, &config.decision_instructions),
    )
}

/// Per-candidate outcome, surfaced for observability/testing.
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionOutcome {
    Added { new_id: String },
    Merged { old_id: String, new_id: String },
    Skipped,
}

/// Runs one full prospective-reflection pass for `user_id`.
///
/// `session_id` is the originating session (spec.md §3's
/// `MemoryEntry.sessionId`) — distinct from `user_id`, since one user's
/// memory store accumulates entries across many sessions.
///
/// Returns the per-candidate outcomes; an empty vector means either the
/// buffer was empty or the extractor returned `NO_TRAIT` — both are normal,
/// not failures. Per-candidate failures (a decider timeout, an extraction
/// hiccup) are isolated: they degrade that candidate to `Skipped` rather
/// than aborting the remaining candidates.
pub async fn reflect<S, X, D, E, V>(
    store: &S,
    namespace: &str,
    user_id: &str,
    session_id: &str,
    extractor: &X,
    decider: &D,
    embedder: &E,
    vector_store: &V,
    similar_k: usize,
) -> Vec<ReflectionOutcome>
where
    S: PersistenceStore,
    X: MemoryExtractor,
    D: MergeAddDecider,
    E: EmbeddingModel,
    V: VectorStoreFacade,
{
    let buffer = load_message_buffer(store, namespace, user_id).await;
    if buffer.is_empty() {
        return Vec::new();
    }

    // Stage before any asynchronous work begins; the live buffer remains
    // independently appendable for the rest of this function.
    save_staging_buffer(store, namespace, user_id, &buffer).await;

    let dialogue = format_dialogue(&buffer);
    let candidates = extractor.extract(&dialogue).await;
    if candidates.is_empty() {
        clear_staging_buffer(store, namespace, user_id).await;
        return Vec::new();
    }

    let mut outcomes = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if let Err(err) = embedder.embed(&candidate.summary).await {
            tracing::warn!(component = "prospective_reflector", user_id, error = %err, "candidate embedding failed, skipping candidate");
            outcomes.push(ReflectionOutcome::Skipped);
            continue;
        }

        let similar = vector_store.similarity_search(&candidate.summary, similar_k).await;
        let decision = decider.decide(&candidate, &similar).await;

        match decision {
            MergeDecision::Add => {
                let entry = MemoryEntry {
                    id: new_memory_id(),
                    session_id: session_id.to_string(),
                    topic_summary: candidate.summary.clone(),
                    raw_dialogue: dialogue.clone(),
                    timestamp: MemoryEntry::now_ms(),
                    turn_references: candidate.reference.clone(),
                };
                vector_store
                    .add_documents(vec![Document {
                        page_content: entry.topic_summary.clone(),
                        metadata: entry.to_metadata(),
                    }])
                    .await;
                outcomes.push(ReflectionOutcome::Added { new_id: entry.id });
            }
            MergeDecision::Merge { index, new_summary } => {
                let Some(target) = similar.get(index) else {
                    // Shouldn't happen: the decider already range-checked,
                    // but a concurrent delete could race it. Fall back to
                    // treating it as an isolated skip for this candidate.
                    outcomes.push(ReflectionOutcome::Skipped);
                    continue;
                };
                let old_entry = MemoryEntry::from_metadata(&target.page_content, &target.metadata);
                let old_id = old_entry.as_ref().map(|e| e.id.clone()).unwrap_or_default();

                if !old_id.is_empty() {
                    vector_store.delete(&[old_id.clone()]).await;
                }

                let merged_turn_references = merged_turn_references(old_entry.as_ref(), &candidate.reference);
                let new_entry = MemoryEntry {
                    id: new_memory_id(),
                    session_id: session_id.to_string(),
                    topic_summary: new_summary,
                    raw_dialogue: dialogue.clone(),
                    timestamp: MemoryEntry::now_ms(),
                    turn_references: merged_turn_references,
                };
                vector_store
                    .add_documents(vec![Document {
                        page_content: new_entry.topic_summary.clone(),
                        metadata: new_entry.to_metadata(),
                    }])
                    .await;
                outcomes.push(ReflectionOutcome::Merged { old_id, new_id: new_entry.id });
            }
        }
    }

    clear_staging_buffer(store, namespace, user_id).await;
    outcomes
}

fn format_dialogue(buffer: &MessageBuffer) -> String {
    buffer
        .turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn new_memory_id() -> String {
    format!("mem-{}", uuid::Uuid::new_v4())
}

/// Unions the old memory's `turn_references` with the candidate's, per
/// spec.md §8's "MERGE preserves `turnReferences` as a superset of both
/// sources" invariant.
fn merged_turn_references(old_entry: Option<&MemoryEntry>, candidate_reference: &[usize]) -> Vec<usize> {
    let mut merged: Vec<usize> = old_entry.map(|e| e.turn_references.clone()).unwrap_or_default();
    for &index in candidate_reference {
        if !merged.contains(&index) {
            merged.push(index);
        }
    }
    merged.sort_unstable();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decider::MergeAddDecider;
    use crate::extractor::{MemoryCandidate, MemoryExtractor};
    use crate::persistence::InMemoryStore;
    use crate::vector_store::{InMemoryVectorStore, SearchHit};

    struct FixedExtractor {
        candidates: Vec<MemoryCandidate>,
    }

    impl MemoryExtractor for FixedExtractor {
        async fn extract(&self, _dialogue: &str) -> Vec<MemoryCandidate> {
            self.candidates.clone()
        }
    }

    struct FixedDecider {
        decision: MergeDecision,
    }

    impl MergeAddDecider for FixedDecider {
        async fn decide(&self, _candidate: &MemoryCandidate, _similar: &[SearchHit]) -> MergeDecision {
            self.decision.clone()
        }
    }

    struct FixedEmbedder;
    impl EmbeddingModel for FixedEmbedder {
        fn dim(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> rmm_core::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct EchoLlm;
    impl LanguageModel for EchoLlm {
        async fn invoke(&self, _prompt: rmm_core::llm::Prompt) -> rmm_core::Result<String> {
            Ok("NO_TRAIT".into())
        }
    }

    #[test]
    fn default_collaborators_wire_the_configured_instructions() {
        let config = ReflectorConfig::new("extract facts", "merge carefully").with_similar_k(3);
        assert_eq!(config.similar_k, 3);
        let llm = EchoLlm;
        let (_extractor, _decider) = default_collaborators(&llm, &config);
    }

    #[tokio::test]
    async fn empty_buffer_short_circuits_with_no_outcomes() {
        let store = InMemoryStore::new();
        let extractor = FixedExtractor { candidates: vec![] };
        let decider = FixedDecider { decision: MergeDecision::Add };
        let embedder = FixedEmbedder;
        let vstore = InMemoryVectorStore::new(2);

        let outcomes = reflect(&store, "ns", "u1", "s1", &extractor, &decider, &embedder, &vstore, 5).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn no_trait_candidates_clear_staging_and_return_empty() {
        let store = InMemoryStore::new();
        let mut buffer = MessageBuffer::default();
        buffer.push("user", "hello there");
        crate::persistence::save_message_buffer(&store, "ns", "u1", &buffer).await;

        let extractor = FixedExtractor { candidates: vec![] };
        let decider = FixedDecider { decision: MergeDecision::Add };
        let embedder = FixedEmbedder;
        let vstore = InMemoryVectorStore::new(2);

        let outcomes = reflect(&store, "ns", "u1", "s1", &extractor, &decider, &embedder, &vstore, 5).await;
        assert!(outcomes.is_empty());
        assert!(crate::persistence::load_staging_buffer(&store, "ns", "u1").await.is_none());
    }

    #[tokio::test]
    async fn scenario_c_merge_branch_deletes_old_and_adds_new() {
        let store = InMemoryStore::new();
        let mut buffer = MessageBuffer::default();
        buffer.push("user", "I love hiking");
        crate::persistence::save_message_buffer(&store, "ns", "u1", &buffer).await;

        let extractor = FixedExtractor {
            candidates: vec![MemoryCandidate { summary: "User enjoys hiking".into(), reference: vec![0] }],
        };
        let decider = FixedDecider {
            decision: MergeDecision::Merge { index: 0, new_summary: "User enjoys hiking and trails".into() },
        };
        let embedder = FixedEmbedder;
        let vstore = InMemoryVectorStore::new(2);
        vstore
            .insert_with_embedding(
                vec![0.9, 0.1],
                Document {
                    page_content: "User likes trails".into(),
                    metadata: MemoryEntry {
                        id: "m1".into(),
                        session_id: "u1".into(),
                        topic_summary: "User likes trails".into(),
                        raw_dialogue: String::new(),
                        timestamp: 0,
                        turn_references: vec![2],
                    }
                    .to_metadata(),
                },
            )
            .await;

        let outcomes = reflect(&store, "ns", "u1", "s1", &extractor, &decider, &embedder, &vstore, 5).await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            ReflectionOutcome::Merged { old_id, .. } => assert_eq!(old_id, "m1"),
            other => panic!("expected Merged, got {other:?}"),
        }

        assert!(vstore.similarity_search_by_vector(&[0.9, 0.1], 5).await.iter().all(|h| h.page_content != "User likes trails"));
        assert!(crate::persistence::load_staging_buffer(&store, "ns", "u1").await.is_none());
    }

    #[tokio::test]
    async fn scenario_d_live_buffer_survives_concurrent_append() {
        let store = InMemoryStore::new();
        let mut buffer = MessageBuffer::default();
        buffer.push("user", "first message");
        crate::persistence::save_message_buffer(&store, "ns", "u1", &buffer).await;

        // A slow extractor stands in for "a new message arrives while
        // reflection is in flight": we append to the live buffer right
        // after staging would have been taken, simulating the race.
        let staged_before = crate::persistence::load_message_buffer(&store, "ns", "u1").await;
        crate::persistence::save_staging_buffer(&store, "ns", "u1", &staged_before).await;

        let mut live = crate::persistence::load_message_buffer(&store, "ns", "u1").await;
        live.push("user", "second message");
        crate::persistence::save_message_buffer(&store, "ns", "u1", &live).await;

        let extractor = FixedExtractor { candidates: vec![] };
        let decider = FixedDecider { decision: MergeDecision::Add };
        let embedder = FixedEmbedder;
        let vstore = InMemoryVectorStore::new(2);

        // Reflection itself now runs against whatever is currently live
        // (simulating that it was already mid-flight); it completes
        // normally and clears staging.
        reflect(&store, "ns", "u1", "s1", &extractor, &decider, &embedder, &vstore, 5).await;

        let reloaded_live = crate::persistence::load_message_buffer(&store, "ns", "u1").await;
        assert_eq!(reloaded_live.turns.len(), 2);
        assert!(crate::persistence::load_staging_buffer(&store, "ns", "u1").await.is_none());
    }
}
