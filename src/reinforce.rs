//! # REINFORCE Updater (spec.md §4.8)
//!
//! The most error-prone subsystem in the crate. Converts citation rewards
//! into a policy gradient over the two residual transforms `W_q`/`W_m`,
//! accumulates it across a batch of turns, and applies a clipped update on
//! flush. Two precision points are load-bearing and each pinned by a test:
//!
//! 1. The chain-rule outer product uses the **original** `q`/`m_i`, never
//!    the adapted `q'`/`m_i'`.
//! 2. The mean-field baseline form `(m_i' - E[m'])` is used, never the
//!    score-function form `(indicator_i - P_i)`, which would attenuate the
//!    gradient by roughly `(1 - P_i)`.

use crate::numerics::{
    Matrix, add_matrix_in_place, clip_matrix, expectation, outer_product, scale_matrix, zero_matrix,
};
use crate::persistence::PersistenceStore;
use crate::persistence::{
    load_gradient_accumulator, load_reranker_state, save_gradient_accumulator, save_reranker_state,
};
use crate::types::{CitationRecord, GradientAccumulator, RerankerState, TurnContext};

/// Per-turn, per-citation gradient contribution before batching.
///
/// Pure function so the five REINFORCE test pillars can pin exact values
/// without touching persistence.
#[must_use]
pub fn turn_gradient(turn_context: &TurnContext, citations: &[CitationRecord], baseline: f32, temperature: f32) -> (Matrix, Matrix) {
    let dim = turn_context.original_query.len();
    let mut grad_wq = zero_matrix(dim, dim);
    let mut grad_wm = zero_matrix(dim, dim);

    let expected_adapted_memory = expectation(
        &turn_context.sampling_probabilities,
        &turn_context.adapted_memory_embeddings,
    );

    for citation in citations {
        let advantage = citation.reward - baseline;
        if advantage == 0.0 {
            continue;
        }
        let Some(&k_index) = turn_context.selected_indices.get(citation.memory_index) else {
            continue;
        };
        let Some(adapted_memory) = turn_context.adapted_memory_embeddings.get(k_index) else {
            continue;
        };
        let Some(original_memory) = turn_context.original_memory_embeddings.get(k_index) else {
            continue;
        };

        let scale = advantage / temperature;

        // gradW_q = (A/τ) · (m_i' - E[m']) ⊗ q  — outer product with the
        // *original* query, per spec.md §4.8 point 1.
        let baseline_term: Vec<f32> = adapted_memory
            .iter()
            .zip(expected_adapted_memory.iter())
            .map(|(m, e)| (m - e) * scale)
            .collect();
        add_matrix_in_place(&mut grad_wq, &outer_product(&baseline_term, &turn_context.original_query));

        // gradW_m = (A/τ) · q' ⊗ m_i — the query-side mean-field collapses
        // to this simpler form because there is exactly one query per turn
        // (E[q'] = q'); outer product with the *original* memory vector.
        let scaled_adapted_query: Vec<f32> = turn_context.adapted_query.iter().map(|q| q * scale).collect();
        add_matrix_in_place(&mut grad_wm, &outer_product(&scaled_adapted_query, original_memory));
    }

    (grad_wq, grad_wm)
}

/// Folds one turn's gradient into the accumulator and bumps `turns_in_batch`.
pub fn accumulate(accumulator: &mut GradientAccumulator, turn_context: &TurnContext, citations: &[CitationRecord], baseline: f32, temperature: f32) {
    let (grad_wq, grad_wm) = turn_gradient(turn_context, citations, baseline, temperature);
    add_matrix_in_place(&mut accumulator.grad_wq, &grad_wq);
    add_matrix_in_place(&mut accumulator.grad_wm, &grad_wm);
    accumulator.turns_in_batch += 1;
}

/// Applies the batch-mean, clipped gradient update to `state` and zeroes the
/// accumulator. No-op if `turns_in_batch == 0` (nothing to flush).
pub fn flush(state: &mut RerankerState, accumulator: &mut GradientAccumulator) {
    if accumulator.turns_in_batch == 0 {
        return;
    }
    let scale = 1.0 / accumulator.turns_in_batch as f32;

    let mut mean_wq = accumulator.grad_wq.clone();
    scale_matrix(&mut mean_wq, scale);
    clip_matrix(&mut mean_wq, state.config.clip_threshold);

    let mut mean_wm = accumulator.grad_wm.clone();
    scale_matrix(&mut mean_wm, scale);
    clip_matrix(&mut mean_wm, state.config.clip_threshold);

    // Ascent on expected reward: `turn_gradient` already orients each term so
    // that a positive advantage pushes the cited memory's adapted score up,
    // so the update adds the (clipped, batch-mean) gradient rather than
    // subtracting it.
    let eta = state.config.learning_rate;
    for (row, grad_row) in state.query_transform.iter_mut().zip(mean_wq.iter()) {
        for (w, g) in row.iter_mut().zip(grad_row.iter()) {
            *w += eta * g;
        }
    }
    for (row, grad_row) in state.memory_transform.iter_mut().zip(mean_wm.iter()) {
        for (w, g) in row.iter_mut().zip(grad_row.iter()) {
            *w += eta * g;
        }
    }

    let dim = state.config.embedding_dimension;
    accumulator.grad_wq = zero_matrix(dim, dim);
    accumulator.grad_wm = zero_matrix(dim, dim);
    accumulator.turns_in_batch = 0;
}

/// Whether the current accumulator should flush: batch is full, or the
/// session has ended (spec.md §4.8 "Batching and flushing").
#[must_use]
pub fn should_flush(accumulator: &GradientAccumulator, batch_size: usize, session_end: bool) -> bool {
    accumulator.turns_in_batch >= batch_size || (session_end && accumulator.turns_in_batch > 0)
}

/// Full persistence-backed update for one turn (spec.md §4.8 end to end).
///
/// Contract skips (logged, not errors): missing `user_id`, no citations, or
/// an incomplete `turn_context` all return `false` without touching state.
/// On load failure the accumulator starts fresh at zero; on save failure
/// the in-memory state is kept and the next turn's save will retry.
pub async fn update<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: Option<&str>,
    turn_context: Option<&TurnContext>,
    citations: &[CitationRecord],
    session_end: bool,
) -> bool {
    let Some(user_id) = user_id else {
        tracing::warn!(component = "reinforce_updater", "missing user_id, skipping update");
        return false;
    };
    let Some(turn_context) = turn_context else {
        tracing::warn!(component = "reinforce_updater", user_id, "missing turn context, skipping update");
        return false;
    };
    if citations.is_empty() {
        tracing::warn!(component = "reinforce_updater", user_id, "no citations this turn, skipping update");
        return false;
    }

    let Some(mut state) = load_reranker_state(store, namespace, user_id).await else {
        tracing::warn!(component = "reinforce_updater", user_id, "no reranker state on record, skipping update");
        return false;
    };

    let mut accumulator = load_gradient_accumulator(store, namespace, user_id)
        .await
        .unwrap_or_else(|| GradientAccumulator::zeroed(state.config.embedding_dimension));

    accumulate(&mut accumulator, turn_context, citations, state.config.baseline, state.config.temperature);

    let flushed = should_flush(&accumulator, state.config.batch_size, session_end);
    if flushed {
        flush(&mut state, &mut accumulator);
        if !save_reranker_state(store, namespace, user_id, &state).await {
            tracing::warn!(component = "reinforce_updater", user_id, "weight save failed, keeping in-memory state");
        }
    }

    if !save_gradient_accumulator(store, namespace, user_id, &accumulator).await {
        tracing::warn!(component = "reinforce_updater", user_id, "accumulator save failed, keeping in-memory state");
    }

    flushed
}

/// Unconditional flush at session end (spec.md §6's `afterAgent` "final
/// REINFORCE flush"), independent of any particular turn's citations.
/// No-op (returns `false`) if there is no reranker state on record or the
/// accumulator is already empty.
pub async fn flush_session<S: PersistenceStore>(store: &S, namespace: &str, user_id: &str) -> bool {
    let Some(mut state) = load_reranker_state(store, namespace, user_id).await else {
        return false;
    };
    let mut accumulator = load_gradient_accumulator(store, namespace, user_id)
        .await
        .unwrap_or_else(|| GradientAccumulator::zeroed(state.config.embedding_dimension));

    if accumulator.turns_in_batch == 0 {
        return false;
    }

    flush(&mut state, &mut accumulator);
    if !save_reranker_state(store, namespace, user_id, &state).await {
        tracing::warn!(component = "reinforce_updater", user_id, "weight save failed, keeping in-memory state");
    }
    if !save_gradient_accumulator(store, namespace, user_id, &accumulator).await {
        tracing::warn!(component = "reinforce_updater", user_id, "accumulator save failed, keeping in-memory state");
    }
    true
}
