// Answer synthesis module
// Query enhancement and cited answers, paced through one shared rate budget

pub mod budget;
pub mod confidence;
pub mod llm;
pub mod parse;
pub mod prompt;


use itertools::Itertools;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, RetrievalConfig};
use crate::document::PassageId;
use crate::retrieval::RetrievalResult;
use parse::ModelAnswer;
use prompt::PromptContext;

pub use budget::{BudgetSnapshot, RateBudget};
pub use llm::{CallKind, GeminiClient, GenerationRequest, LanguageModel, LlmError};
pub use prompt::DocumentType;

/// Reply used whenever the retrieved passages cannot support an answer
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "The provided document does not contain information relevant to your query.";

const ENHANCEMENT_MAX_OUTPUT_TOKENS: u32 = 200;
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("rate limit still exceeded after {attempts} attempts")]
    RateExhausted { attempts: u32 },

    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("unusable model output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub citations: Vec<PassageId>,
    pub confidence: f32,
    /// False when the passages did not support an answer
    pub grounded: bool,
}

impl Synthesis {
    fn insufficient(best_score: Option<f32>) -> Self {
        Self {
            answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
            confidence: confidence::insufficient(best_score),
            grounded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub context_passages: usize,
    pub max_context_chars: usize,
    pub max_question_chars: usize,
    pub min_relevance: f32,
    pub enhance_queries: bool,
}

impl SynthesisSettings {
    #[inline]
    pub fn from_config(llm: &LlmConfig, retrieval: &RetrievalConfig) -> Self {
        Self {
            max_output_tokens: llm.max_output_tokens,
            temperature: llm.temperature,
            context_passages: retrieval.context_passages,
            max_context_chars: retrieval.max_context_chars,
            max_question_chars: retrieval.max_question_chars,
            min_relevance: retrieval.min_relevance,
            enhance_queries: retrieval.enhance_queries,
        }
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default(), &RetrievalConfig::default())
    }
}

pub struct SynthesisOrchestrator {
    model: Arc<dyn LanguageModel>,
    budget: Arc<RateBudget>,
    settings: SynthesisSettings,
}

impl SynthesisOrchestrator {
    #[inline]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        budget: Arc<RateBudget>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            model,
            budget,
            settings,
        }
    }

    #[inline]
    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    #[inline]
    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Enforce the spacing between question starts
    #[inline]
    pub async fn begin_question(&self) {
        self.budget.begin_question().await;
    }

    /// The question as sent downstream, cut to the configured length
    #[inline]
    pub fn bound_question(&self, question: &str) -> String {
        prompt::truncate_text(question.trim(), self.settings.max_question_chars)
    }

    /// Ask the model for a retrieval-friendly rewrite of `question`. Any
    /// failure yields the question unchanged.
    #[inline]
    pub async fn enhance_query(&self, question: &str, document_type: DocumentType) -> String {
        if !self.settings.enhance_queries {
            return question.to_string();
        }

        let request_prompt = prompt::enhancement_prompt(question, document_type);
        let max_tokens = ENHANCEMENT_MAX_OUTPUT_TOKENS.min(self.settings.max_output_tokens);

        match self
            .invoke(CallKind::QueryEnhancement, request_prompt, max_tokens)
            .await
        {
            Ok(reply) => match parse::parse_refined_query(&reply) {
                Ok(refined) => {
                    debug!("Refined query: {}", refined);
                    refined
                }
                Err(reason) => {
                    warn!("Query enhancement unusable ({}), using original question", reason);
                    question.to_string()
                }
            },
            Err(e) => {
                warn!("Query enhancement failed ({}), using original question", e);
                question.to_string()
            }
        }
    }

    /// Produce a cited answer from `retrieval`.
    ///
    /// No call is made when nothing relevant was retrieved. An unparseable
    /// reply is retried once with a stricter prompt.
    #[inline]
    pub async fn synthesize(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        document_type: DocumentType,
    ) -> Result<Synthesis, SynthesisError> {
        let result = self.synthesize_checked(question, retrieval, document_type).await;
        if matches!(result, Err(SynthesisError::RateExhausted { .. })) {
            self.budget.record_exhausted();
        }
        result
    }

    async fn synthesize_checked(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
        document_type: DocumentType,
    ) -> Result<Synthesis, SynthesisError> {
        let best_score = match retrieval.best_score() {
            Some(score) if score >= self.settings.min_relevance => score,
            other => {
                info!(
                    "No passage reaches relevance {:.2} (best {:?}), skipping synthesis",
                    self.settings.min_relevance, other
                );
                return Ok(Synthesis::insufficient(other));
            }
        };

        let question = self.bound_question(question);
        let context = prompt::build_context(
            retrieval,
            self.settings.context_passages,
            self.settings.max_context_chars,
        );

        let answer = match self
            .answer_attempt(&question, &context.text, document_type, false)
            .await?
        {
            Ok(answer) => answer,
            Err(reason) => {
                warn!("Unparseable answer ({}), retrying with stricter prompt", reason);
                self.answer_attempt(&question, &context.text, document_type, true)
                    .await?
                    .map_err(SynthesisError::Parse)?
            }
        };

        Ok(assemble(&question, answer, &context, best_score, document_type))
    }

    async fn answer_attempt(
        &self,
        question: &str,
        context: &str,
        document_type: DocumentType,
        after_parse_failure: bool,
    ) -> Result<Result<ModelAnswer, String>, SynthesisError> {
        let request_prompt =
            prompt::answer_prompt(question, context, document_type, after_parse_failure);

        match self
            .invoke(
                CallKind::AnswerSynthesis,
                request_prompt,
                self.settings.max_output_tokens,
            )
            .await
        {
            Ok(reply) => Ok(parse::parse_answer(&reply)),
            Err(SynthesisError::Provider(LlmError::EmptyResponse)) => {
                Ok(Err("empty model response".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// One logical call: paced attempts with exponential backoff on
    /// rate limiting and transient failures.
    async fn invoke(
        &self,
        kind: CallKind,
        prompt: String,
        max_output_tokens: u32,
    ) -> Result<String, SynthesisError> {
        let request = GenerationRequest {
            kind,
            prompt,
            max_output_tokens,
            temperature: self.settings.temperature,
        };
        let pacing = self.budget.pacing();
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            let outcome = self.budget.call(|| self.model.generate(&request)).await;
            let error = match outcome {
                Ok(reply) => return Ok(reply),
                Err(error) => error,
            };

            if !error.is_retryable() {
                warn!("{:?} call failed: {}", kind, error);
                return Err(SynthesisError::Provider(error));
            }

            let rate_limited = matches!(error, LlmError::RateLimited(_));
            if rate_limited {
                self.budget.record_rate_limited();
            }

            if attempt > pacing.max_retries {
                warn!(
                    "{:?} call gave up after {} attempts: {}",
                    kind, attempt, error
                );
                return Err(if rate_limited {
                    SynthesisError::RateExhausted { attempts: attempt }
                } else {
                    SynthesisError::Provider(error)
                });
            }

            let delay = pacing.backoff_delay(attempt);
            warn!(
                "{:?} call failed ({}), retry {}/{} in {:?}",
                kind, error, attempt, pacing.max_retries, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn assemble(
    question: &str,
    answer: ModelAnswer,
    context: &PromptContext,
    best_score: f32,
    document_type: DocumentType,
) -> Synthesis {
    let citations: Vec<PassageId> = answer
        .citations
        .iter()
        .map(|raw| PassageId::from(raw.trim().trim_matches(['[', ']'])))
        .filter(|id| context.shows(id))
        .unique()
        .collect();

    if citations.len() < answer.citations.len() {
        debug!(
            "Discarded {} citations outside the passages shown to the model",
            answer.citations.len() - citations.len()
        );
    }

    let quality = confidence::answer_quality(question, &answer.answer);
    let model_confidence = answer.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE);

    if !answer.grounded {
        let score = confidence::combine(
            model_confidence,
            best_score,
            quality,
            false,
            document_type.strict_citations(),
        );
        return Synthesis {
            answer: answer.answer,
            citations: Vec::new(),
            confidence: score.min(confidence::UNGROUNDED_CAP),
            grounded: false,
        };
    }

    let score = confidence::combine(
        model_confidence,
        best_score,
        quality,
        !citations.is_empty(),
        document_type.strict_citations(),
    );

    Synthesis {
        answer: answer.answer,
        citations,
        confidence: score,
        grounded: true,
    }
}
