use thiserror::Error;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index build error: {0}")]
    IndexBuild(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding model mismatch: index built with '{index_model}', provider uses '{provider_model}'")]
    ModelMismatch {
        index_model: String,
        provider_model: String,
    },

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl QaError {
    /// Whether this error, raised while answering one question, must abort the
    /// whole request instead of degrading that question.
    #[inline]
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Ingestion(_)
                | Self::IndexBuild(_)
                | Self::DimensionMismatch { .. }
                | Self::ModelMismatch { .. }
        )
    }
}

pub mod commands;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod mcp;
pub mod pipeline;
pub mod retrieval;
pub mod synthesis;
pub mod vector_store;
