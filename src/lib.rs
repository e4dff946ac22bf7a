//! Reflective memory management core.
//!
//! Wires ten narrow components — an embedding adapter, a vector store
//! facade, an LLM-driven extractor and decider, a prospective reflector, a
//! retrospective retriever with a learned linear reranker, a citation
//! scorer, an online REINFORCE updater, and an offline InfoNCE pretrainer —
//! behind the three hook points a host agent calls once per turn:
//! [`before_model`], [`after_model`], and [`after_agent`].
//!
//! None of this crate drives conversational turns, tool calls, or
//! streaming; it only answers, given a query and a persisted per-user
//! state, which memories to surface and how to adjust future retrievals.

pub mod citation;
pub mod decider;
pub mod error;
pub mod extractor;
pub mod numerics;
pub mod persistence;
pub mod pretrain;
pub mod reflector;
pub mod reinforce;
pub mod retriever;
pub mod types;
pub mod vector_store;

pub use citation::{CitationScorer, SubstringCitationScorer};
pub use decider::{MergeAddDecider, MergeDecision};
pub use error::{Result, RmmError};
pub use extractor::{MemoryCandidate, MemoryExtractor};
pub use persistence::{InMemoryStore, PersistenceStore};
pub use reflector::{ReflectionOutcome, ReflectorConfig, default_collaborators};
pub use rmm_core::{EmbeddingModel, LanguageModel};
pub use types::{
    CitationRecord, GradientAccumulator, MemoryEntry, RerankerConfig, RerankerState,
    RetrievedMemory, TurnContext,
};
pub use vector_store::{Document, InMemoryVectorStore, SearchHit, VectorStoreFacade};

/// Per-session bookkeeping the host keeps alive across a conversation:
/// the monotonic turn counter and the turn-local [`TurnContext`] bridging
/// `before_model` to `after_model`. Never persisted — spec.md §3 scopes
/// `TurnContext`'s lifetime to a single turn.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Owning user id; also the persistence namespace key.
    pub user_id: String,
    /// Origin session id (spec.md §3's `MemoryEntry.sessionId`), distinct
    /// from `user_id`: one user accumulates memories across many sessions.
    pub session_id: String,
    /// Monotonic, session-local turn counter (spec.md §4.6 step 10).
    pub turn_count: usize,
    turn_context: Option<TurnContext>,
}

impl SessionState {
    /// Starts a fresh session for `user_id`/`session_id`, turn counter at
    /// zero.
    #[must_use]
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            turn_count: 0,
            turn_context: None,
        }
    }
}

/// Result of `beforeModel` (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct BeforeModelOutput {
    /// The memories surfaced to the LLM this turn.
    pub retrieved_memories: Vec<RetrievedMemory>,
    /// `SessionState::turn_count` after this turn's increment.
    pub turn_count_in_session: usize,
}

/// Runs the retrospective retriever and stashes its `TurnContext` on
/// `session` for the matching `after_model` call. Always bumps
/// `session.turn_count`, even when retrieval degrades to empty
/// (spec.md §4.6 steps 1 and 3).
pub async fn before_model<E, V, R>(
    embedder: &E,
    vector_store: &V,
    session: &mut SessionState,
    query_text: &str,
    reranker_state: &RerankerState,
    rng: &mut R,
) -> BeforeModelOutput
where
    E: EmbeddingModel,
    V: VectorStoreFacade,
    R: rand::Rng,
{
    session.turn_count += 1;
    let outcome = retriever::retrieve(embedder, vector_store, query_text, reranker_state, rng).await;
    session.turn_context = outcome.turn_context;
    BeforeModelOutput {
        retrieved_memories: outcome.retrieved_memories,
        turn_count_in_session: session.turn_count,
    }
}

/// Result of `afterModel` (spec.md §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct AfterModelOutput {
    /// Whether this turn's citations triggered a batch flush to `W_q`/`W_m`.
    pub updated_weights: bool,
    /// Always `true`: `TurnContext` is consumed unconditionally.
    pub cleared_turn_context: bool,
}

/// Scores citations against the stashed `TurnContext`, accumulates the
/// resulting REINFORCE gradient, and flushes if the batch is full or
/// `session_end` is set. Clears `session`'s turn context unconditionally,
/// matching spec.md §3's "cleared in afterModel" lifecycle rule.
pub async fn after_model<S, C>(
    store: &S,
    namespace: &str,
    session: &mut SessionState,
    citation_scorer: &C,
    response: &str,
    session_end: bool,
) -> AfterModelOutput
where
    S: PersistenceStore,
    C: CitationScorer,
{
    let turn_context = session.turn_context.take();
    let citations = match &turn_context {
        Some(ctx) => citation_scorer.score(response, session.turn_count, &ctx.retrieved_memories),
        None => Vec::new(),
    };

    let updated_weights = reinforce::update(
        store,
        namespace,
        Some(session.user_id.as_str()),
        turn_context.as_ref(),
        &citations,
        session_end,
    )
    .await;

    AfterModelOutput {
        updated_weights,
        cleared_turn_context: true,
    }
}

/// Runs at session end (spec.md §6): triggers prospective reflection and
/// forces a final REINFORCE flush of any partial batch, independent of
/// whatever this turn's citations were.
pub async fn after_agent<S, X, D, E, V>(
    store: &S,
    namespace: &str,
    session: &SessionState,
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
    reinforce::flush_session(store, namespace, &session.user_id).await;
    reflector::reflect(
        store,
        namespace,
        &session.user_id,
        &session.session_id,
        extractor,
        decider,
        embedder,
        vector_store,
        similar_k,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::zero_matrix;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct FixedEmbedder;
    impl EmbeddingModel for FixedEmbedder {
        fn dim(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> rmm_core::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn before_model_increments_turn_counter_even_when_degraded() {
        let vector_store = InMemoryVectorStore::new(2);
        let embedder = FixedEmbedder;
        let state = RerankerState {
            query_transform: zero_matrix(2, 2),
            memory_transform: zero_matrix(2, 2),
            config: RerankerConfig::new(2),
        };
        let mut session = SessionState::new("u1", "s1");
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let output = before_model(&embedder, &vector_store, &mut session, "hello?", &state, &mut rng).await;
        assert_eq!(output.turn_count_in_session, 1);
        assert_eq!(session.turn_count, 1);
        assert!(output.retrieved_memories.is_empty());
    }

    #[tokio::test]
    async fn after_model_clears_turn_context_with_no_stashed_context() {
        let store = InMemoryStore::new();
        let mut session = SessionState::new("u1", "s1");
        let scorer = SubstringCitationScorer::default();

        let output = after_model(&store, "ns", &mut session, &scorer, "no memories this turn", false).await;
        assert!(output.cleared_turn_context);
        assert!(!output.updated_weights);
        assert!(session.turn_context.is_none());
    }
}
