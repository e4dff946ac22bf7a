//! Data model (spec.md §3): the persisted and turn-local value types shared
//! across the ten components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::numerics::Matrix;

/// Arbitrary caller-supplied turn metadata, e.g. a request id.
pub type Metadata = BTreeMap<String, String>;

/// A durable memory fact, persisted in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Stable, globally unique identifier.
    pub id: String,
    /// Session that originated this memory.
    pub session_id: String,
    /// Natural-language summary; this is what gets embedded and shown to
    /// the LLM.
    pub topic_summary: String,
    /// Verbatim source snippet, kept for traceability.
    pub raw_dialogue: String,
    /// Creation or last-merge time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Turn indices that contributed to this memory, in order.
    pub turn_references: Vec<usize>,
}

impl MemoryEntry {
    /// Returns the current time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn now_ms() -> i64 {
        let now = OffsetDateTime::now_utc();
        (now.unix_timestamp_nanos() / 1_000_000) as i64
    }

    /// Encodes everything but `topic_summary` (which the vector store keeps
    /// as `page_content`) into the facade's flat string metadata map.
    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), self.id.clone());
        metadata.insert("session_id".into(), self.session_id.clone());
        metadata.insert("timestamp".into(), self.timestamp.to_string());
        metadata.insert("raw_dialogue".into(), self.raw_dialogue.clone());
        metadata.insert(
            "turn_references".into(),
            self.turn_references
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
        metadata
    }

    /// Reconstructs a [`MemoryEntry`] from a vector store hit's
    /// `page_content`/metadata pair. `None` only if `id` is absent, which
    /// indicates a document this crate never wrote.
    #[must_use]
    pub fn from_metadata(page_content: &str, metadata: &Metadata) -> Option<Self> {
        let id = metadata.get("id")?.clone();
        let session_id = metadata.get("session_id").cloned().unwrap_or_default();
        let timestamp = metadata
            .get("timestamp")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(Self::now_ms);
        let raw_dialogue = metadata.get("raw_dialogue").cloned().unwrap_or_default();
        let turn_references = metadata
            .get("turn_references")
            .map(|v| v.split(',').filter(|s| !s.is_empty()).filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default();
        Some(Self {
            id,
            session_id,
            topic_summary: page_content.to_string(),
            raw_dialogue,
            timestamp,
            turn_references,
        })
    }
}

/// Turn-local view of a [`MemoryEntry`], enriched with retrieval context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMemory {
    /// The underlying persisted memory.
    #[serde(flatten)]
    pub entry: MemoryEntry,
    /// The memory's raw vector, populated at retrieval time.
    pub embedding: Vec<f32>,
    /// Score returned by the vector store, if any (absent uses `None`).
    pub relevance_score: Option<f32>,
}

/// Reranker hyperparameters, persisted alongside the weight matrices.
///
/// Deliberately an explicit struct rather than a dynamic config map, per
/// spec.md §9's "dynamic config objects → explicit typed config" guidance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Retrieval breadth `K`.
    pub top_k: usize,
    /// Reranked selection size `M`.
    pub top_m: usize,
    /// Softmax temperature `τ`; must stay positive.
    pub temperature: f32,
    /// REINFORCE learning rate `η`.
    pub learning_rate: f32,
    /// REINFORCE baseline `b`.
    pub baseline: f32,
    /// Turns accumulated per batch before a flush.
    pub batch_size: usize,
    /// Per-element gradient clip threshold.
    pub clip_threshold: f32,
    /// Embedding dimension `d`.
    pub embedding_dimension: usize,
}

impl RerankerConfig {
    /// Creates a config for the given embedding dimension, with every other
    /// field at its spec-mandated default.
    #[must_use]
    pub fn new(embedding_dimension: usize) -> Self {
        Self {
            top_k: 20,
            top_m: 5,
            temperature: 0.5,
            learning_rate: 0.001,
            baseline: 0.5,
            batch_size: 16,
            clip_threshold: 100.0,
            embedding_dimension,
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, value: usize) -> Self {
        self.top_k = value.max(1);
        self
    }

    #[must_use]
    pub fn with_top_m(mut self, value: usize) -> Self {
        self.top_m = value.max(1).min(self.top_k.max(value));
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, value: f32) -> Self {
        self.temperature = value.max(f32::EPSILON);
        self
    }

    #[must_use]
    pub fn with_learning_rate(mut self, value: f32) -> Self {
        self.learning_rate = value;
        self
    }

    #[must_use]
    pub fn with_baseline(mut self, value: f32) -> Self {
        self.baseline = value;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, value: usize) -> Self {
        self.batch_size = value.max(1);
        self
    }

    #[must_use]
    pub fn with_clip_threshold(mut self, value: f32) -> Self {
        self.clip_threshold = value.abs();
        self
    }
}

/// Per-user reranker state: the two residual transforms plus their config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerState {
    /// Query-side residual transform `W_q`.
    pub query_transform: Matrix,
    /// Memory-side residual transform `W_m`.
    pub memory_transform: Matrix,
    /// Hyperparameters.
    pub config: RerankerConfig,
}

/// Per-user gradient accumulator, persisted between turns within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientAccumulator {
    /// Running sum of per-sample query-side gradients.
    pub grad_wq: Matrix,
    /// Running sum of per-sample memory-side gradients.
    pub grad_wm: Matrix,
    /// Number of turns folded into the accumulator since the last flush.
    pub turns_in_batch: usize,
}

impl GradientAccumulator {
    /// Creates a zeroed accumulator for dimension `d`.
    #[must_use]
    pub fn zeroed(dim: usize) -> Self {
        Self {
            grad_wq: crate::numerics::zero_matrix(dim, dim),
            grad_wm: crate::numerics::zero_matrix(dim, dim),
            turns_in_batch: 0,
        }
    }
}

/// Turn-local retrieval context, stashed by `beforeModel` and consumed by
/// `afterModel`. Never persisted — cleared at the end of each turn.
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Raw query embedding `q`.
    pub original_query: Vec<f32>,
    /// Adapted query embedding `q' = q + W_q·q`.
    pub adapted_query: Vec<f32>,
    /// The `K` memory embeddings returned by similarity search, original.
    pub original_memory_embeddings: Vec<Vec<f32>>,
    /// Adapted memory embeddings, `m_i' = m_i + W_m·m_i`.
    pub adapted_memory_embeddings: Vec<Vec<f32>>,
    /// Length-`K` softmax distribution over adapted scores.
    pub sampling_probabilities: Vec<f32>,
    /// Indices (length `M`) of memories surfaced to the LLM.
    pub selected_indices: Vec<usize>,
    /// The `M` retrieved memories passed to the agent.
    pub retrieved_memories: Vec<RetrievedMemory>,
}

/// One citation observation per selected memory per turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Index into `TurnContext::selected_indices` / `retrieved_memories`.
    pub memory_index: usize,
    /// Session-local turn counter.
    pub turn_index: usize,
    /// Whether the assistant's response referenced this memory.
    pub cited: bool,
    /// `+1` if cited, `-1` otherwise, unless the caller configured a
    /// different reward map.
    pub reward: f32,
}

impl CitationRecord {
    /// Builds a record using the spec-mandated default reward map
    /// (`cited -> +1`, `uncited -> -1`).
    #[must_use]
    pub fn with_default_reward(memory_index: usize, turn_index: usize, cited: bool) -> Self {
        Self {
            memory_index,
            turn_index,
            cited,
            reward: if cited { 1.0 } else { -1.0 },
        }
    }
}

/// A single serialised dialogue turn kept in a [`MessageBuffer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedTurn {
    pub role: String,
    pub content: String,
    pub timestamp: i64,
}

/// Per-user message buffer, persisted between sessions, plus the staging
/// slot used for crash-safe prospective reflection (spec.md §4.5 step 2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBuffer {
    /// Ordered dialogue turns.
    pub turns: Vec<BufferedTurn>,
    /// Count of human-authored turns.
    pub human_message_count: usize,
    /// Timestamp of the most recently appended turn.
    pub last_message_timestamp: Option<i64>,
    /// Timestamp the buffer was first created.
    pub created_at: Option<i64>,
}

impl MessageBuffer {
    pub fn push(&mut self, role: impl Into<String>, content: impl Into<String>) {
        let now = MemoryEntry::now_ms();
        let role = role.into();
        if role == "user" {
            self.human_message_count += 1;
        }
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.last_message_timestamp = Some(now);
        self.turns.push(BufferedTurn {
            role,
            content: content.into(),
            timestamp: now,
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
