//! In-memory, brute-force cosine index over embedded chunks.
//!
//! Vectors live in one contiguous `Vec<f32>` with a row stride of `dims`;
//! chunks live in a parallel `Vec<Chunk>`. Rows are normalized to unit
//! length at build time and every query is normalized before scoring, so a
//! similarity is a plain dot product.
//!
//! The index is immutable once built. Rebuilding a conversation's index
//! means building a new [`VectorIndex`] and swapping it in.

use std::cmp::Ordering;

use anyhow::{bail, Result};

use crate::embedding::{dot, normalize};
use crate::models::{Chunk, EmbeddedChunk};

/// A chunk returned from [`VectorIndex::top_k`] with its similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Immutable cosine-similarity index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dims: usize,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Build an index from embedded chunks.
    ///
    /// # Errors
    ///
    /// Fails when the input is empty, when a vector is empty, or when
    /// vectors disagree on dimensionality.
    pub fn build(embedded: Vec<EmbeddedChunk>) -> Result<Self> {
        let Some(first) = embedded.first() else {
            bail!("cannot build an index from zero chunks");
        };
        let dims = first.vector.len();
        if dims == 0 {
            bail!("embedding vectors must not be empty");
        }

        let mut vectors = Vec::with_capacity(dims * embedded.len());
        let mut chunks = Vec::with_capacity(embedded.len());

        for item in embedded {
            if item.vector.len() != dims {
                bail!(
                    "dimension mismatch for chunk {}: expected {}, got {}",
                    item.chunk.ord,
                    dims,
                    item.vector.len()
                );
            }
            let start = vectors.len();
            vectors.extend_from_slice(&item.vector);
            normalize(&mut vectors[start..]);
            chunks.push(item.chunk);
        }

        Ok(Self {
            dims,
            vectors,
            chunks,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Vector dimensionality shared by every row.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Return the `k` chunks most similar to `query`.
    ///
    /// Results are sorted by similarity descending; equal similarities
    /// rank the smaller `ord` first. `k` larger than [`len`](Self::len) is
    /// clamped, and `k == 0` returns nothing.
    ///
    /// # Errors
    ///
    /// Fails when the query's dimensionality differs from the index.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dims {
            bail!(
                "query dimension mismatch: index has {}, query has {}",
                self.dims,
                query.len()
            );
        }

        let mut q = query.to_vec();
        normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dims)
            .map(|row| dot(row, &q))
            .enumerate()
            .collect();

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.chunks[*ia].ord.cmp(&self.chunks[*ib].ord))
        });
        scored.truncate(k.min(self.len()));

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect())
    }
}
