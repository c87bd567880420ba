// Remote vector index client
// Pinecone-compatible data-plane REST API, one namespace per document

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::RemoteIndexConfig;

const API_KEY_HEADER: &str = "Api-Key";
const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
const RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PineconeClient {
    host: Url,
    api_key: Option<String>,
    upsert_batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteVector {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteMatch {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [RemoteVector],
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RemoteMatch>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    delete_all: bool,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    dimension: usize,
}

impl PineconeClient {
    #[inline]
    pub fn new(config: &RemoteIndexConfig) -> Result<Self> {
        let host = Url::parse(&config.host)
            .with_context(|| format!("Invalid remote index host: {}", config.host))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build()
            .into();

        Ok(Self {
            host,
            api_key: config.api_key.clone(),
            upsert_batch_size: config.upsert_batch_size.max(1),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Dimension the remote index was created with
    #[inline]
    pub fn describe_dimension(&self) -> Result<usize> {
        let body = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .context("Failed to describe remote index")?;
        let stats: IndexStats =
            serde_json::from_str(&body).context("Failed to parse index stats")?;
        Ok(stats.dimension)
    }

    /// Write vectors into `namespace` in batches; returns the number written.
    #[inline]
    pub fn upsert(&self, namespace: &str, vectors: &[RemoteVector]) -> Result<usize> {
        let mut written = 0;

        for batch in vectors.chunks(self.upsert_batch_size) {
            let body = self
                .post(
                    "/vectors/upsert",
                    &UpsertRequest {
                        vectors: batch,
                        namespace,
                    },
                )
                .with_context(|| format!("Failed to upsert batch of {} vectors", batch.len()))?;

            let response: UpsertResponse =
                serde_json::from_str(&body).context("Failed to parse upsert response")?;
            if response.upserted_count != batch.len() {
                return Err(anyhow::anyhow!(
                    "Remote index acknowledged {} of {} vectors",
                    response.upserted_count,
                    batch.len()
                ));
            }
            written += batch.len();
        }

        debug!("Upserted {} vectors into namespace {}", written, namespace);
        Ok(written)
    }

    #[inline]
    pub fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<RemoteMatch>> {
        let body = self
            .post(
                "/query",
                &QueryRequest {
                    vector,
                    top_k,
                    namespace,
                    include_metadata: true,
                    include_values: false,
                },
            )
            .context("Failed to query remote index")?;

        let response: QueryResponse =
            serde_json::from_str(&body).context("Failed to parse query response")?;
        Ok(response.matches)
    }

    #[inline]
    pub fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.post(
            "/vectors/delete",
            &DeleteRequest {
                delete_all: true,
                namespace,
            },
        )
        .with_context(|| format!("Failed to delete namespace {}", namespace))?;
        Ok(())
    }

    fn post<T: Serialize>(&self, endpoint: &str, payload: &T) -> Result<String> {
        let url = self
            .host
            .join(endpoint)
            .with_context(|| format!("Failed to build URL for {}", endpoint))?;
        let request_json = serde_json::to_string(payload).context("Failed to serialize request")?;

        let mut last_error = None;
        for attempt in 1..=self.retry_attempts {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key.as_str());
            }

            match request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
            {
                Ok(body) => return Ok(body),
                Err(ureq::Error::StatusCode(status)) if status < 500 => {
                    return Err(anyhow::anyhow!("Remote index rejected request: HTTP {}", status));
                }
                Err(error) => {
                    warn!(
                        "Remote index request to {} failed: {}, attempt {}/{}",
                        endpoint, error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Request error: {}", error));
                    if attempt < self.retry_attempts {
                        std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}
