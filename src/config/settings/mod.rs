
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const PINECONE_API_KEY_ENV: &str = "PINECONE_API_KEY";
pub const PINECONE_INDEX_HOST_ENV: &str = "PINECONE_INDEX_HOST";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_index: Option<RemoteIndexConfig>,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Language model endpoint (Gemini `generateContent` API)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
            api_key: None,
            max_output_tokens: 1000,
            temperature: 0.2,
            timeout_seconds: 60,
        }
    }
}

/// Managed vector index (Pinecone-compatible data plane)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteIndexConfig {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub upsert_batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for RemoteIndexConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: None,
            upsert_batch_size: 100,
            timeout_seconds: 30,
        }
    }
}

/// Pacing and retry policy shared by every language model call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PacingConfig {
    pub min_call_interval_ms: u64,
    pub question_interval_ms: u64,
    /// Rolling one-minute quota; 0 disables it.
    pub requests_per_minute: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_call_interval_ms: 2000,
            question_interval_ms: 3000,
            requests_per_minute: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub context_passages: usize,
    pub max_context_chars: usize,
    pub max_question_chars: usize,
    pub min_relevance: f32,
    pub question_concurrency: usize,
    pub enhance_queries: bool,
    /// Maximum number of document indexes kept alive; 0 keeps all of them.
    pub max_cached_indexes: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            context_passages: 5,
            max_context_chars: 12_000,
            max_question_chars: 2000,
            min_relevance: 0.3,
            question_concurrency: 2,
            enhance_queries: true,
            max_cached_indexes: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 2 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max output tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxOutputTokens(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid upsert batch size: {0} (must be between 1 and 1000)")]
    InvalidUpsertBatchSize(usize),
    #[error("Invalid retry count: {0} (must be at most 10)")]
    InvalidMaxRetries(u32),
    #[error("Max backoff ({0}ms) must not be smaller than base backoff ({1}ms)")]
    BackoffRangeInverted(u64, u64),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid context passage count: {0} (must be between 1 and top_k)")]
    InvalidContextPassages(usize),
    #[error("Invalid max context chars: {0} (must be between 500 and 200000)")]
    InvalidMaxContextChars(usize),
    #[error("Invalid max question chars: {0} (must be between 50 and 20000)")]
    InvalidMaxQuestionChars(usize),
    #[error("Invalid min relevance: {0} (must be between -1.0 and 1.0)")]
    InvalidMinRelevance(f32),
    #[error("Invalid question concurrency: {0} (must be between 1 and 16)")]
    InvalidQuestionConcurrency(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory, `~/.docqa`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".docqa"))
            .or_else(|| dirs::data_dir().map(|data| data.join("docqa")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the
    /// file does not exist. Environment overrides are applied before validation.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();
        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply secret and endpoint overrides from an arbitrary key lookup.
    /// Empty values are ignored.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(GEMINI_API_KEY_ENV) {
            self.llm.api_key = Some(key);
        }

        if let Some(host) = lookup(PINECONE_INDEX_HOST_ENV) {
            self.remote_index.get_or_insert_with(RemoteIndexConfig::default).host = host;
        }

        if let Some(key) = lookup(PINECONE_API_KEY_ENV) {
            if let Some(remote) = self.remote_index.as_mut() {
                remote.api_key = Some(key);
            }
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.llm.validate()?;
        if let Some(remote) = &self.remote_index {
            remote.validate()?;
        }
        self.pacing.validate()?;
        self.retrieval.validate()?;
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

fn validate_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidProtocol(other.to_string())),
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.ollama_url()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(2..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url(&self.base_url)?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=8192).contains(&self.max_output_tokens) {
            return Err(ConfigError::InvalidMaxOutputTokens(self.max_output_tokens));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl RemoteIndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url(&self.host)?;

        if !(1..=1000).contains(&self.upsert_batch_size) {
            return Err(ConfigError::InvalidUpsertBatchSize(self.upsert_batch_size));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl PacingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 10 {
            return Err(ConfigError::InvalidMaxRetries(self.max_retries));
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(ConfigError::BackoffRangeInverted(
                self.backoff_max_ms,
                self.backoff_base_ms,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn min_call_interval(&self) -> Duration {
        Duration::from_millis(self.min_call_interval_ms)
    }

    #[inline]
    pub fn question_interval(&self) -> Duration {
        Duration::from_millis(self.question_interval_ms)
    }

    /// Delay before retry number `attempt` (1-based): base doubled per
    /// attempt, capped at the configured maximum.
    #[inline]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .backoff_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay_ms)
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if self.context_passages == 0 || self.context_passages > self.top_k {
            return Err(ConfigError::InvalidContextPassages(self.context_passages));
        }

        if !(500..=200_000).contains(&self.max_context_chars) {
            return Err(ConfigError::InvalidMaxContextChars(self.max_context_chars));
        }

        if !(50..=20_000).contains(&self.max_question_chars) {
            return Err(ConfigError::InvalidMaxQuestionChars(
                self.max_question_chars,
            ));
        }

        if !(-1.0..=1.0).contains(&self.min_relevance) {
            return Err(ConfigError::InvalidMinRelevance(self.min_relevance));
        }

        if !(1..=16).contains(&self.question_concurrency) {
            return Err(ConfigError::InvalidQuestionConcurrency(
                self.question_concurrency,
            ));
        }

        Ok(())
    }
}
