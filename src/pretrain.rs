//! # Offline Pretrainer (spec.md §4.9)
//!
//! Batch-mode supervised pre-training of `W_q`/`W_m` from labelled
//! `(query, positive, negatives[])` triples, using an InfoNCE contrastive
//! loss over cosine similarities of the adapted embeddings. Gradients use
//! the full cosine-similarity derivative (the `cos·u/|u|` correction term
//! included, per spec.md §9's numerical-hygiene note), composed via outer
//! product with the *original* query/memory vectors — the same convention
//! the online updater in [`crate::reinforce`] uses.

use rand::Rng;

use crate::numerics::{Matrix, add_matrix_in_place, l2_norm, outer_product, residual_transform, scale_matrix, zero_matrix};

/// One labelled training example: a query, its one positive, and its
/// negatives, all pre-embedded.
#[derive(Debug, Clone)]
pub struct Triple {
    pub query: Vec<f32>,
    pub positive: Vec<f32>,
    pub negatives: Vec<Vec<f32>>,
}

/// Pretraining hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct PretrainConfig {
    pub temperature: f32,
    pub learning_rate: f32,
    pub epochs: usize,
}

/// Per-epoch training telemetry. Storing full weight snapshots per epoch is
/// deliberately not offered, to keep epoch logs memory-cheap.
#[derive(Debug, Clone, Copy)]
pub struct EpochReport {
    pub epoch: usize,
    pub mean_loss: f32,
}

/// Evaluation summary over a set of triples.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    pub mean_loss: f32,
    pub recall_at_5: f32,
}

/// Initialises `W_q`/`W_m` from `N(0, 0.01²)` via a hand-rolled Box-Muller
/// transform, so the exact initialisation algorithm spec.md names is
/// reproducible from a seeded RNG rather than delegated to a library's
/// (different) sampling algorithm.
#[must_use]
pub fn init_weights(dim: usize, rng: &mut impl Rng) -> (Matrix, Matrix) {
    (gaussian_matrix(dim, rng), gaussian_matrix(dim, rng))
}

fn gaussian_matrix(dim: usize, rng: &mut impl Rng) -> Matrix {
    let mut out = zero_matrix(dim, dim);
    for row in &mut out {
        for value in row.iter_mut() {
            *value = box_muller_sample(rng) * 0.01;
        }
    }
    out
}

/// Standard-normal sample via the classical Box-Muller transform.
fn box_muller_sample(rng: &mut impl Rng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

/// Full derivative of `cosine_similarity(u, v)` with respect to `u`:
/// `(v/|v| - cos·u/|u|) / |u|`. Returns `None` (caller should skip the
/// sample, not propagate `NaN`) if either vector has zero norm.
fn cosine_derivative(u: &[f32], v: &[f32]) -> Option<Vec<f32>> {
    let norm_u = l2_norm(u);
    let norm_v = l2_norm(v);
    if norm_u == 0.0 || norm_v == 0.0 {
        return None;
    }
    let cos: f32 = u.iter().zip(v.iter()).map(|(a, b)| a * b).sum::<f32>() / (norm_u * norm_v);
    Some(
        u.iter()
            .zip(v.iter())
            .map(|(ui, vi)| (vi / norm_v - cos * ui / norm_u) / norm_u)
            .collect(),
    )
}

fn cosine_similarity_or_zero(u: &[f32], v: &[f32]) -> f32 {
    let norm_u = l2_norm(u);
    let norm_v = l2_norm(v);
    if norm_u == 0.0 || norm_v == 0.0 {
        return 0.0;
    }
    u.iter().zip(v.iter()).map(|(a, b)| a * b).sum::<f32>() / (norm_u * norm_v)
}

/// Per-sample InfoNCE loss and gradient contribution. Returns `None` when
/// any adapted vector has zero norm — skipped as a zero-gradient sample per
/// spec.md §4.9's numerical hygiene rule, never `NaN`.
fn sample_loss_and_gradient(triple: &Triple, w_q: &Matrix, w_m: &Matrix, temperature: f32) -> Option<(f32, Matrix, Matrix)> {
    let adapted_query = residual_transform(&triple.query, w_q).ok()?;
    let adapted_positive = residual_transform(&triple.positive, w_m).ok()?;
    let adapted_negatives: Vec<Vec<f32>> = triple
        .negatives
        .iter()
        .map(|n| residual_transform(n, w_m))
        .collect::<Result<_, _>>()
        .ok()?;

    let candidates: Vec<&Vec<f32>> = std::iter::once(&adapted_positive).chain(adapted_negatives.iter()).collect();
    let originals: Vec<&Vec<f32>> = std::iter::once(&triple.positive).chain(triple.negatives.iter()).collect();

    let sims: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity_or_zero(&adapted_query, c) / temperature)
        .collect();
    let max = sims.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = sims.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    if sum == 0.0 {
        return None;
    }
    let softmax: Vec<f32> = exp.iter().map(|e| e / sum).collect();
    let loss = -(softmax[0].max(f32::MIN_POSITIVE)).ln();

    let dim = triple.query.len();
    let mut grad_wq = zero_matrix(dim, dim);
    let mut grad_wm = zero_matrix(dim, dim);

    for (i, candidate) in candidates.iter().enumerate() {
        let indicator = if i == 0 { 1.0 } else { 0.0 };
        let coefficient = (softmax[i] - indicator) / temperature;

        // d(sim)/d(q') composed with the original query.
        if let Some(d_query) = cosine_derivative(&adapted_query, candidate) {
            let scaled: Vec<f32> = d_query.iter().map(|g| g * coefficient).collect();
            add_matrix_in_place(&mut grad_wq, &outer_product(&scaled, &triple.query));
        }
        // d(sim)/d(x') composed with the original memory vector (positive
        // or negative).
        if let Some(d_candidate) = cosine_derivative(candidate, &adapted_query) {
            let scaled: Vec<f32> = d_candidate.iter().map(|g| g * coefficient).collect();
            add_matrix_in_place(&mut grad_wm, &outer_product(&scaled, originals[i]));
        }
    }

    Some((loss, grad_wq, grad_wm))
}

/// Runs `config.epochs` epochs of full-batch gradient descent over
/// `triples`, mutating `w_q`/`w_m` in place and returning one
/// [`EpochReport`] per epoch.
pub fn train(w_q: &mut Matrix, w_m: &mut Matrix, triples: &[Triple], config: &PretrainConfig) -> Vec<EpochReport> {
    let dim = w_q.len();
    let mut reports = Vec::with_capacity(config.epochs);

    for epoch in 0..config.epochs {
        let mut grad_wq_sum = zero_matrix(dim, dim);
        let mut grad_wm_sum = zero_matrix(dim, dim);
        let mut loss_sum = 0.0;
        let mut counted = 0usize;

        for triple in triples {
            if let Some((loss, grad_wq, grad_wm)) = sample_loss_and_gradient(triple, w_q, w_m, config.temperature) {
                loss_sum += loss;
                counted += 1;
                add_matrix_in_place(&mut grad_wq_sum, &grad_wq);
                add_matrix_in_place(&mut grad_wm_sum, &grad_wm);
            }
        }

        if counted > 0 {
            let scale = 1.0 / counted as f32;
            scale_matrix(&mut grad_wq_sum, scale);
            scale_matrix(&mut grad_wm_sum, scale);
            for (row, grad_row) in w_q.iter_mut().zip(grad_wq_sum.iter()) {
                for (w, g) in row.iter_mut().zip(grad_row.iter()) {
                    *w -= config.learning_rate * g;
                }
            }
            for (row, grad_row) in w_m.iter_mut().zip(grad_wm_sum.iter()) {
                for (w, g) in row.iter_mut().zip(grad_row.iter()) {
                    *w -= config.learning_rate * g;
                }
            }
        }

        let mean_loss = if counted > 0 { loss_sum / counted as f32 } else { 0.0 };
        reports.push(EpochReport { epoch, mean_loss });
    }

    reports
}

/// Evaluates `w_q`/`w_m` against `triples`: mean InfoNCE loss, and
/// Recall@5 (the positive counts as a top-5 hit iff fewer than 5 negatives
/// score higher than it under the adapted similarity).
#[must_use]
pub fn evaluate(w_q: &Matrix, w_m: &Matrix, triples: &[Triple], temperature: f32) -> Evaluation {
    let mut loss_sum = 0.0;
    let mut hits = 0usize;
    let mut counted = 0usize;

    for triple in triples {
        let Some((loss, _, _)) = sample_loss_and_gradient(triple, w_q, w_m, temperature) else {
            continue;
        };
        loss_sum += loss;
        counted += 1;

        let Ok(adapted_query) = residual_transform(&triple.query, w_q) else {
            continue;
        };
        let Ok(adapted_positive) = residual_transform(&triple.positive, w_m) else {
            continue;
        };
        let positive_sim = cosine_similarity_or_zero(&adapted_query, &adapted_positive);
        let better_negatives = triple
            .negatives
            .iter()
            .filter_map(|n| residual_transform(n, w_m).ok())
            .filter(|adapted_negative| cosine_similarity_or_zero(&adapted_query, adapted_negative) > positive_sim)
            .count();
        if better_negatives < 5 {
            hits += 1;
        }
    }

    Evaluation {
        mean_loss: if counted > 0 { loss_sum / counted as f32 } else { 0.0 },
        recall_at_5: if counted > 0 { hits as f32 / counted as f32 } else { 0.0 },
    }
}
