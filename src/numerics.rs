//! # Embedding Adapter (spec.md §4.1)
//!
//! Pure, allocation-light numerical helpers shared by the retriever, the
//! REINFORCE updater, and the offline pretrainer. Nothing in this module
//! performs I/O or holds state; every routine is a plain function over
//! `&[f32]` / `Matrix` values, kept separate from orchestration so the
//! REINFORCE math (the most error-prone part of the crate, per spec.md
//! §4.8) can be unit-tested in isolation from any collaborator.

use crate::error::{Result, RmmError};

/// A dense `d`×`d` matrix, stored row-major.
pub type Matrix = Vec<Vec<f32>>;

/// Allocates a `rows`×`cols` matrix of zeros.
#[must_use]
pub fn zero_matrix(rows: usize, cols: usize) -> Matrix {
    vec![vec![0.0; cols]; rows]
}

/// `b += a` element-wise. Panics (via assertion) if shapes differ, since
/// shape drift between accumulator and weight matrices is a programming
/// error, not a recoverable condition.
pub fn add_matrix_in_place(target: &mut Matrix, addend: &Matrix) {
    assert_eq!(target.len(), addend.len(), "row count mismatch");
    for (row, addend_row) in target.iter_mut().zip(addend.iter()) {
        assert_eq!(row.len(), addend_row.len(), "column count mismatch");
        for (value, addend_value) in row.iter_mut().zip(addend_row.iter()) {
            *value += addend_value;
        }
    }
}

/// Scales every element of `matrix` by `factor`, in place.
pub fn scale_matrix(matrix: &mut Matrix, factor: f32) {
    for row in matrix.iter_mut() {
        for value in row.iter_mut() {
            *value *= factor;
        }
    }
}

/// Clips every element of `matrix` into `[-threshold, threshold]`, in place.
pub fn clip_matrix(matrix: &mut Matrix, threshold: f32) {
    for row in matrix.iter_mut() {
        for value in row.iter_mut() {
            *value = value.clamp(-threshold, threshold);
        }
    }
}

/// Outer product `u · vᵀ`, producing a `u.len()`×`v.len()` matrix.
#[must_use]
pub fn outer_product(u: &[f32], v: &[f32]) -> Matrix {
    u.iter()
        .map(|&ui| v.iter().map(|&vi| ui * vi).collect())
        .collect()
}

/// Matrix-vector product `W · x`.
///
/// # Errors
/// Returns [`RmmError::DimensionMismatch`] if `x.len()` does not match the
/// matrix's column count.
pub fn matvec(w: &Matrix, x: &[f32]) -> Result<Vec<f32>> {
    if let Some(first_row) = w.first() {
        if first_row.len() != x.len() {
            return Err(RmmError::DimensionMismatch {
                expected: first_row.len(),
                actual: x.len(),
            });
        }
    }
    Ok(w.iter()
        .map(|row| row.iter().zip(x.iter()).map(|(a, b)| a * b).sum())
        .collect())
}

/// `l2` norm of a vector.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Residual transform `x' = x + W·x`, a skip-connected linear layer.
///
/// With `W = 0` this reduces to the identity, so an untrained reranker
/// reproduces plain embedding similarity exactly — the invariant spec.md
/// §4.1 calls out by name.
///
/// # Errors
/// Returns [`RmmError::DimensionMismatch`] if `x` and `w`'s rows disagree
/// in length.
pub fn residual_transform(x: &[f32], w: &Matrix) -> Result<Vec<f32>> {
    let delta = matvec(w, x)?;
    Ok(x.iter().zip(delta.iter()).map(|(a, b)| a + b).collect())
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// # Errors
/// - [`RmmError::DimensionMismatch`] if lengths differ.
/// - [`RmmError::ZeroNorm`] if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RmmError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(RmmError::ZeroNorm);
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok(dot / (norm_a * norm_b))
}

/// Numerically stable softmax via max-subtraction.
///
/// Returns a distribution over `scores` scaled by `1/temperature`. Returns
/// the uniform distribution if `scores` is empty.
#[must_use]
pub fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let scaled: Vec<f32> = scores.iter().map(|s| s / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scaled.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    if sum == 0.0 {
        let uniform = 1.0 / scores.len() as f32;
        return vec![uniform; scores.len()];
    }
    exp.iter().map(|e| e / sum).collect()
}

/// Expectation of adapted vectors under a probability distribution:
/// `Σ_j P_j · v_j`.
///
/// # Panics
/// Panics if `probabilities.len() != vectors.len()`, a programming error.
#[must_use]
pub fn expectation(probabilities: &[f32], vectors: &[Vec<f32>]) -> Vec<f32> {
    assert_eq!(probabilities.len(), vectors.len());
    let dim = vectors.first().map_or(0, Vec::len);
    let mut out = vec![0.0; dim];
    for (p, v) in probabilities.iter().zip(vectors.iter()) {
        for (o, vi) in out.iter_mut().zip(v.iter()) {
            *o += p * vi;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_orders_by_angle() {
        let a = [1.0, 0.0, 0.0];
        let b = [1.0, 1.0, 0.0];
        let c = [0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).unwrap() > cosine_similarity(&a, &c).unwrap());
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_rejects_mismatched_lengths() {
        let a = [1.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        assert!(matches!(
            cosine_similarity(&a, &b),
            Err(RmmError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn cosine_similarity_rejects_zero_vectors() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        assert!(matches!(cosine_similarity(&a, &b), Err(RmmError::ZeroNorm)));
    }

    #[test]
    fn residual_transform_with_zero_weights_is_identity() {
        let x = vec![1.0, -2.0, 3.0];
        let w = zero_matrix(3, 3);
        assert_eq!(residual_transform(&x, &w).unwrap(), x);
    }

    #[test]
    fn residual_transform_applies_skip_connection() {
        let x = vec![1.0, 0.5];
        let mut w = zero_matrix(2, 2);
        w[0][0] = 1.0; // first output dim doubles x[0]
        let out = residual_transform(&x, &w).unwrap();
        assert_eq!(out, vec![2.0, 0.5]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let scores = [1.0, 2.0, 0.5, -1.0];
        let probs = softmax(&scores, 0.5);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn softmax_on_empty_input_is_empty() {
        assert!(softmax(&[], 1.0).is_empty());
    }

    #[test]
    fn softmax_matches_hand_computed_scenario_b() {
        // spec.md Scenario B: q=[1,0], memories [[1,0],[0,1]], tau=1 -> cos sims [1, 0]
        let probs = softmax(&[1.0, 0.0], 1.0);
        assert!((probs[0] - 0.731_058_6).abs() < 1e-5);
        assert!((probs[1] - 0.268_941_4).abs() < 1e-5);
    }

    #[test]
    fn expectation_of_single_certain_outcome_is_that_outcome() {
        let probs = [1.0];
        let vectors = vec![vec![3.0, 4.0]];
        assert_eq!(expectation(&probs, &vectors), vec![3.0, 4.0]);
    }

    #[test]
    fn outer_product_has_correct_shape_and_values() {
        let u = [1.0, 2.0];
        let v = [3.0, 4.0, 5.0];
        let m = outer_product(&u, &v);
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].len(), 3);
        assert_eq!(m[0], vec![3.0, 4.0, 5.0]);
        assert_eq!(m[1], vec![6.0, 8.0, 10.0]);
    }

    #[test]
    fn clip_matrix_bounds_values() {
        let mut m = vec![vec![150.0, -200.0], vec![5.0, 0.0]];
        clip_matrix(&mut m, 100.0);
        assert_eq!(m, vec![vec![100.0, -100.0], vec![5.0, 0.0]]);
    }

    #[test]
    fn add_matrix_in_place_accumulates() {
        let mut acc = zero_matrix(2, 2);
        add_matrix_in_place(&mut acc, &outer_product(&[1.0, 1.0], &[1.0, 1.0]));
        add_matrix_in_place(&mut acc, &outer_product(&[1.0, 1.0], &[1.0, 1.0]));
        assert_eq!(acc, vec![vec![2.0, 2.0], vec![2.0, 2.0]]);
    }
}
