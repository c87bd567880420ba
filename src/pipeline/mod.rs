// Pipeline coordinator
// Build-or-reuse an index, then answer every question in order with per-question isolation


use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, RetrievalConfig};
use crate::document::{Document, DocumentFingerprint, Passage, PassageId};
use crate::embeddings::OllamaClient;
use crate::retrieval::SemanticRetriever;
use crate::synthesis::{
    BudgetSnapshot, DocumentType, GeminiClient, RateBudget, SynthesisOrchestrator,
    SynthesisSettings,
};
use crate::vector_store::{BackendKind, IndexHandle, IndexSummary, PineconeClient, VectorStore};
use crate::{QaError, Result};

/// Answer text of a question that could not be processed
pub const DEGRADED_ANSWER: &str = "An answer could not be produced for this question.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    /// Nothing retrieved was relevant enough to answer from
    InsufficientContext,
    /// The question failed; `reason` says why
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    pub question: String,
    pub answer: String,
    pub confidence: f32,
    pub citations: Vec<PassageId>,
    pub status: AnswerStatus,
}

impl AnswerRecord {
    fn degraded(question: &str, reason: String) -> Self {
        Self {
            question: question.to_string(),
            answer: DEGRADED_ANSWER.to_string(),
            confidence: 0.0,
            citations: Vec::new(),
            status: AnswerStatus::Degraded { reason },
        }
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, AnswerStatus::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub preferred_backend: BackendKind,
    pub backend_in_use: BackendKind,
    pub index_count: usize,
    pub indexes: Vec<IndexSummary>,
    pub degraded_builds: u64,
    pub degraded_queries: u64,
    pub embedding_model: String,
    pub language_model: String,
    pub rate_budget: BudgetSnapshot,
}

pub struct Pipeline {
    store: Arc<VectorStore>,
    retriever: SemanticRetriever,
    orchestrator: SynthesisOrchestrator,
    top_k: usize,
    question_concurrency: usize,
}

impl Pipeline {
    #[inline]
    pub fn new(
        store: Arc<VectorStore>,
        orchestrator: SynthesisOrchestrator,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            retriever: SemanticRetriever::new(Arc::clone(&store)),
            store,
            orchestrator,
            top_k: retrieval.top_k,
            question_concurrency: retrieval.question_concurrency.max(1),
        }
    }

    /// Wire the Ollama embedder, the optional remote index and the Gemini
    /// model from `config`.
    #[inline]
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| QaError::Config(e.to_string()))?;

        let embedder = OllamaClient::new(&config.ollama)
            .map_err(|e| QaError::Config(format!("{:#}", e)))?;
        let model =
            GeminiClient::new(&config.llm).map_err(|e| QaError::Config(format!("{:#}", e)))?;

        let mut store = VectorStore::new(Arc::new(embedder))
            .with_max_cached_indexes(config.retrieval.max_cached_indexes);
        if let Some(remote) = &config.remote_index {
            let client =
                PineconeClient::new(remote).map_err(|e| QaError::Config(format!("{:#}", e)))?;
            info!("Remote vector index at {}", client.host());
            store = store.with_remote(client);
        }

        let orchestrator = SynthesisOrchestrator::new(
            Arc::new(model),
            Arc::new(RateBudget::new(config.pacing.clone())),
            SynthesisSettings::from_config(&config.llm, &config.retrieval),
        );

        Ok(Self::new(Arc::new(store), orchestrator, &config.retrieval))
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    #[inline]
    pub fn orchestrator(&self) -> &SynthesisOrchestrator {
        &self.orchestrator
    }

    /// Answer `questions` about a loaded document.
    #[inline]
    pub async fn answer_document(
        &self,
        document: &Document,
        questions: &[String],
        document_type: Option<DocumentType>,
    ) -> Result<Vec<AnswerRecord>> {
        self.answer(
            &document.fingerprint,
            &document.passages,
            questions,
            document_type,
        )
        .await
    }

    /// One record per question, in question order.
    ///
    /// Fails as a whole only when the index cannot be built or the embedding
    /// setup no longer matches it; every other failure degrades the affected
    /// question alone.
    #[inline]
    pub async fn answer(
        &self,
        fingerprint: &DocumentFingerprint,
        passages: &[Passage],
        questions: &[String],
        document_type: Option<DocumentType>,
    ) -> Result<Vec<AnswerRecord>> {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            document = fingerprint.short(),
            questions = questions.len()
        );

        self.answer_inner(fingerprint, passages, questions, document_type)
            .instrument(span)
            .await
    }

    async fn answer_inner(
        &self,
        fingerprint: &DocumentFingerprint,
        passages: &[Passage],
        questions: &[String],
        document_type: Option<DocumentType>,
    ) -> Result<Vec<AnswerRecord>> {
        if questions.is_empty() {
            debug!("No questions, nothing to do");
            return Ok(Vec::new());
        }

        let handle = self.store.build(fingerprint, passages).await?;
        let document_type =
            document_type.unwrap_or_else(|| DocumentType::detect(handle.passages()));
        info!(
            "Answering {} questions against {} passages ({} document, {:?} backend)",
            questions.len(),
            handle.passage_count(),
            document_type,
            handle.active_backend()
        );

        // collect first: a closure-mapped stream is not Send
        let pending: Vec<_> = questions
            .iter()
            .map(|question| self.answer_question(&handle, question, document_type))
            .collect();
        let records: Vec<AnswerRecord> = stream::iter(pending)
            .buffered(self.question_concurrency)
            .try_collect()
            .await?;

        let degraded = records.iter().filter(|r| r.is_degraded()).count();
        if degraded > 0 {
            warn!("{} of {} questions degraded", degraded, records.len());
        }
        info!("Answered {} questions", records.len());
        Ok(records)
    }

    /// Answer one question. `Err` only for failures that doom the whole request.
    async fn answer_question(
        &self,
        handle: &IndexHandle,
        question: &str,
        document_type: DocumentType,
    ) -> Result<AnswerRecord> {
        let bounded = self.orchestrator.bound_question(question);
        if bounded.is_empty() {
            return Ok(AnswerRecord::degraded(question, "empty question".to_string()));
        }

        self.orchestrator.begin_question().await;

        let query = self.orchestrator.enhance_query(&bounded, document_type).await;
        let retrieval = match self.retriever.retrieve(handle, &query, self.top_k).await {
            Ok(retrieval) => retrieval,
            Err(e) if e.is_request_fatal() => return Err(e),
            Err(e) => {
                warn!("Retrieval failed, degrading question: {}", e);
                return Ok(AnswerRecord::degraded(question, e.to_string()));
            }
        };

        match self
            .orchestrator
            .synthesize(&bounded, &retrieval, document_type)
            .await
        {
            Ok(synthesis) => Ok(AnswerRecord {
                question: question.to_string(),
                answer: synthesis.answer,
                confidence: synthesis.confidence,
                citations: synthesis.citations,
                status: if synthesis.grounded {
                    AnswerStatus::Answered
                } else {
                    AnswerStatus::InsufficientContext
                },
            }),
            Err(e) => {
                warn!("Synthesis failed, degrading question: {}", e);
                Ok(AnswerRecord::degraded(question, e.to_string()))
            }
        }
    }

    #[inline]
    pub fn status(&self) -> PipelineStatus {
        let store = self.store.status();
        let backend_in_use = if store.indexes.is_empty() {
            store.preferred_backend
        } else if store
            .indexes
            .iter()
            .any(|index| index.backend == BackendKind::Remote)
        {
            BackendKind::Remote
        } else {
            BackendKind::Local
        };

        PipelineStatus {
            preferred_backend: store.preferred_backend,
            backend_in_use,
            index_count: store.indexes.len(),
            indexes: store.indexes,
            degraded_builds: store.degraded_builds,
            degraded_queries: store.degraded_queries,
            embedding_model: self.store.embedder().model().to_string(),
            language_model: self.orchestrator.model_name().to_string(),
            rate_budget: self.orchestrator.budget().snapshot(),
        }
    }

    /// Drop the cached index of a document; returns whether one existed.
    #[inline]
    pub async fn invalidate(&self, fingerprint: &DocumentFingerprint) -> bool {
        self.store.invalidate(fingerprint).await
    }
}
