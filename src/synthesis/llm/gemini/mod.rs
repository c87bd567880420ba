
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{GenerationRequest, LanguageModel, LlmError};
use crate::config::LlmConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Blocking client for the Gemini `generateContent` endpoint. Retries are the
/// caller's business so that every attempt is paced.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    endpoint: String,
    model: String,
    api_key: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    #[inline]
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("Gemini API key is not configured (set GEMINI_API_KEY)")?;

        let base = config.base_url.trim_end_matches('/');
        let endpoint = format!("{}/v1beta/models/{}:generateContent", base, config.model);

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key,
            agent,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Single attempt, classified into [`LlmError`]
    #[inline]
    pub fn generate_blocking(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: "application/json",
            },
        };
        let request_json = serde_json::to_string(&body)
            .map_err(|e| LlmError::InvalidRequest(format!("failed to serialize request: {}", e)))?;

        debug!(
            "Calling {} for {:?} ({} prompt chars)",
            self.model,
            request.kind,
            request.prompt.len()
        );

        let response_text = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, self.api_key.as_str())
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(classify_error)?;

        let response: GenerateContentResponse = serde_json::from_str(&response_text)
            .map_err(|e| LlmError::Malformed(format!("unexpected response body: {}", e)))?;

        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            warn!("Prompt blocked by provider: {}", reason);
            return Err(LlmError::InvalidRequest(format!("prompt blocked: {}", reason)));
        }

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(text)
    }
}

fn classify_error(error: ureq::Error) -> LlmError {
    match error {
        ureq::Error::StatusCode(429) => LlmError::RateLimited("HTTP 429".to_string()),
        ureq::Error::StatusCode(status @ (401 | 403)) => {
            LlmError::Unauthorized(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) if status >= 500 => {
            LlmError::Unavailable(format!("HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => LlmError::InvalidRequest(format!("HTTP {}", status)),
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => LlmError::Unavailable(error.to_string()),
        other => LlmError::Malformed(other.to_string()),
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let client = self.clone();
        let request = request.clone();

        tokio::task::spawn_blocking(move || client.generate_blocking(&request))
            .await
            .map_err(|e| LlmError::Unavailable(format!("generation task failed: {}", e)))?
    }
}
