//! In-process exact search over L2-normalized vectors.

use crate::{QaError, Result};

/// Flat inner-product index. Vectors are normalized on insert so the inner
/// product of a normalized query is its cosine similarity.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dimension: usize,
    data: Vec<f32>,
}

impl LocalBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn with_capacity(dimension: usize, vectors: usize) -> Self {
        Self {
            dimension,
            data: Vec::with_capacity(dimension.saturating_mul(vectors)),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector; its position is the passage ordinal.
    #[inline]
    pub fn insert(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(QaError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.data.extend(normalize(vector));
        Ok(())
    }

    /// Top `k` positions by cosine similarity, best first; ties keep the
    /// lower position first.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(QaError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalize(query);
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| (position, dot(&query, vector).clamp(-1.0, 1.0)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Scale to unit length; the zero vector is returned unchanged.
#[inline]
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
