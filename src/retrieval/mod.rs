// Semantic retrieval
// Embeds a question and returns the most similar passages of one document


use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::document::{Passage, PassageId};
use crate::embeddings::EmbeddingProvider;
use crate::vector_store::{IndexHandle, VectorStore};
use crate::{QaError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Passages ordered by non-increasing score, ties by ascending ordinal,
/// with no passage appearing twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub passages: Vec<ScoredPassage>,
}

impl RetrievalResult {
    /// Rank candidates, keep the best score per passage and cut to `k`.
    #[inline]
    pub fn ranked<I>(candidates: I, k: usize) -> Self
    where
        I: IntoIterator<Item = ScoredPassage>,
    {
        let passages = candidates
            .into_iter()
            .sorted_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.passage.ordinal.cmp(&b.passage.ordinal))
            })
            .unique_by(|candidate| candidate.passage.id.clone())
            .take(k)
            .collect();

        Self { passages }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    #[inline]
    pub fn best_score(&self) -> Option<f32> {
        self.passages.first().map(|p| p.score)
    }

    #[inline]
    pub fn contains(&self, id: &PassageId) -> bool {
        self.passages.iter().any(|p| &p.passage.id == id)
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ScoredPassage> {
        self.passages.iter()
    }
}

pub struct SemanticRetriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SemanticRetriever {
    #[inline]
    pub fn new(store: Arc<VectorStore>) -> Self {
        let embedder = store.embedder();
        Self { store, embedder }
    }

    /// Query with a provider other than the one the store builds with
    #[inline]
    pub fn with_embedder(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Embed `question` and return its `k` most similar passages.
    ///
    /// A provider whose model or dimension differs from the one the index was
    /// built with is rejected before anything is searched.
    #[inline]
    pub async fn retrieve(
        &self,
        handle: &IndexHandle,
        question: &str,
        k: usize,
    ) -> Result<RetrievalResult> {
        if self.embedder.model() != handle.model() {
            return Err(QaError::ModelMismatch {
                index_model: handle.model().to_string(),
                provider_model: self.embedder.model().to_string(),
            });
        }
        if self.embedder.dimension() != handle.dimension() {
            return Err(QaError::DimensionMismatch {
                expected: handle.dimension(),
                actual: self.embedder.dimension(),
            });
        }

        let k = k.min(handle.passage_count());
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let vectors = self.embedder.embed(&[question.to_string()]).await?;
        let query = vectors.into_iter().next().ok_or_else(|| {
            QaError::Embedding("provider returned no vector for the question".to_string())
        })?;

        let result = self.store.search(handle, &query, k).await?;
        debug!(
            "Retrieved {} passages for question (best score {:?})",
            result.len(),
            result.best_score()
        );
        Ok(result)
    }
}
