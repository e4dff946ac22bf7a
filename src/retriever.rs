//! # Retrospective Retriever (spec.md §4.6)
//!
//! Runs in `beforeModel`: embeds the query, pulls the top-`K` similar
//! memories, applies the residual transforms, and samples `topM` distinct
//! memories without replacement according to the softmax distribution over
//! adapted scores. Every collaborator call is wrapped so a failure degrades
//! to an empty turn rather than propagating — the retriever never returns
//! `Err`, matching spec.md §7's "the agent never crashes" contract.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use rmm_core::EmbeddingModel;

use crate::numerics::{cosine_similarity, residual_transform, softmax};
use crate::types::{MemoryEntry, RerankerState, RetrievedMemory, TurnContext};
use crate::vector_store::VectorStoreFacade;

/// Result of one retrieval pass.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Stashed for the afterModel hook; `None` whenever retrieval degraded
    /// (no query, embedding failure, or empty candidate set) or found no
    /// candidates.
    pub turn_context: Option<TurnContext>,
    /// The memories surfaced to the LLM this turn (length `min(topM, |K|)`).
    pub retrieved_memories: Vec<RetrievedMemory>,
}

/// Runs the full retrieval + rerank + sample pipeline for one query.
///
/// `query_text` is the raw human utterance; an empty/blank query (spec.md
/// §4.6 step 1, "no human query in the message history") short-circuits to
/// an empty outcome without calling any collaborator.
pub async fn retrieve<E, V, R>(embedder: &E, vector_store: &V, query_text: &str, state: &RerankerState, rng: &mut R) -> RetrievalOutcome
where
    E: EmbeddingModel,
    V: VectorStoreFacade,
    R: Rng,
{
    if query_text.trim().is_empty() {
        return RetrievalOutcome::default();
    }

    let query = match embedder.embed(query_text).await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(component = "retrospective_retriever", error = %err, "query embedding failed, degrading to no memories");
            return RetrievalOutcome::default();
        }
    };

    let hits = vector_store.similarity_search(query_text, state.config.top_k).await;
    if hits.is_empty() {
        return RetrievalOutcome::default();
    }

    let summaries: Vec<&str> = hits.iter().map(|h| h.page_content.as_str()).collect();
    let memory_embeddings = match embedder.embed_many(&summaries).await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(component = "retrospective_retriever", error = %err, "memory embedding failed, degrading to no memories");
            return RetrievalOutcome::default();
        }
    };

    let adapted_query = match residual_transform(&query, &state.query_transform) {
        Ok(v) => v,
        Err(err) => {
            tracing::error!(component = "retrospective_retriever", error = %err, "query/weight dimension mismatch, degrading to no memories");
            return RetrievalOutcome::default();
        }
    };

    let mut adapted_memory_embeddings = Vec::with_capacity(memory_embeddings.len());
    for embedding in &memory_embeddings {
        match residual_transform(embedding, &state.memory_transform) {
            Ok(v) => adapted_memory_embeddings.push(v),
            Err(err) => {
                tracing::error!(component = "retrospective_retriever", error = %err, "memory/weight dimension mismatch, degrading to no memories");
                return RetrievalOutcome::default();
            }
        }
    }

    let scores: Vec<f32> = adapted_memory_embeddings
        .iter()
        .map(|m| match cosine_similarity(&adapted_query, m) {
            Ok(score) => score,
            Err(_) => {
                // ZeroNorm during inference degrades to a uniform score,
                // per spec.md §7.
                0.0
            }
        })
        .collect();

    let probabilities = softmax(&scores, state.config.temperature);
    let selected_indices = sample_without_replacement(&probabilities, state.config.top_m, rng);

    let retrieved_memories: Vec<RetrievedMemory> = selected_indices
        .iter()
        .filter_map(|&i| {
            let hit = hits.get(i)?;
            let entry = MemoryEntry::from_metadata(&hit.page_content, &hit.metadata)?;
            Some(RetrievedMemory {
                entry,
                embedding: memory_embeddings[i].clone(),
                relevance_score: hit.score,
            })
        })
        .collect();

    let turn_context = TurnContext {
        original_query: query,
        adapted_query,
        original_memory_embeddings: memory_embeddings,
        adapted_memory_embeddings,
        sampling_probabilities: probabilities,
        selected_indices,
        retrieved_memories: retrieved_memories.clone(),
    };

    RetrievalOutcome {
        turn_context: Some(turn_context),
        retrieved_memories,
    }
}

/// Draws `m` distinct indices from `0..probabilities.len()` without
/// replacement, weighted by `probabilities`, renormalizing after each draw
/// (spec.md §4.6 step 8). Ties — including the degenerate all-zero-weight
/// case — break deterministically toward the lower vector-store rank.
fn sample_without_replacement(probabilities: &[f32], m: usize, rng: &mut impl Rng) -> Vec<usize> {
    let k = probabilities.len();
    let take = m.min(k);
    let mut remaining: Vec<usize> = (0..k).collect();
    let mut selected = Vec::with_capacity(take);

    for _ in 0..take {
        let weights: Vec<f32> = remaining.iter().map(|&i| probabilities[i].max(0.0)).collect();
        let total: f32 = weights.iter().sum();
        let position = if total <= f32::EPSILON {
            0
        } else {
            match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => 0,
            }
        };
        selected.push(remaining.remove(position));
    }

    selected
}
