// Embeddings module
// Provider abstraction and the Ollama HTTP client

pub mod ollama;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaClient;

/// Turns text into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input, in input order.
/// Callers validate the returned dimension against [`dimension`](Self::dimension).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier; an index built with one model is never queried with another.
    fn model(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Largest number of texts accepted by a single [`embed`](Self::embed) call
    fn max_batch_size(&self) -> usize {
        16
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
