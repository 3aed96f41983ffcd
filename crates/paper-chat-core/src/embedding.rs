//! Vector utilities for embedding comparison.
//!
//! The index compares unit vectors, so both stored rows and queries are
//! passed through [`normalize`] once. [`cosine_similarity`] is kept for
//! callers that hold raw, unnormalized vectors.

/// Euclidean (L2) norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length in place.
///
/// Zero (or near-zero) vectors are left untouched; their dot product with
/// anything stays `0.0`, which ranks them last.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm < f32::EPSILON {
        return;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Dot product of two equally sized vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let denom = l2_norm(a) * l2_norm(b);
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot(a, b) / denom
}
