//! Shared fixtures: wiremock stand-ins for Ollama, Gemini and the remote index

#![allow(dead_code)]

use docqa::config::{Config, LlmConfig, OllamaConfig, PacingConfig, RemoteIndexConfig, RetrievalConfig};
use docqa::document::Document;
use serde_json::{Value, json};
use std::path::Path;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const VOCABULARY: [&str; 4] = ["grace", "waiting", "maternity", "cataract"];
pub const EMBEDDING_MODEL: &str = "keyword-embed";
pub const LANGUAGE_MODEL: &str = "gemini-test";

/// One dimension per vocabulary word plus a constant bias
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
        .collect();
    vector.push(0.1);
    vector
}

pub fn policy_document() -> Document {
    Document::from_texts(
        "policy.json",
        [
            (
                "A grace period of thirty days is provided for premium payment after the due date.",
                Some(3),
            ),
            (
                "Maternity expenses are covered after a waiting period of 24 months.",
                Some(5),
            ),
            (
                "Cataract surgery is covered up to 25% of the sum insured per eye.",
                Some(6),
            ),
            (
                "Pre-existing diseases have a waiting period of 36 months.",
                Some(7),
            ),
        ],
    )
    .expect("should build policy document")
}

pub async fn mount_ollama(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(|request: &Request| {
            let body: Value = request.body_json().expect("embed request should be JSON");
            let embeddings: Vec<Vec<f32>> = body["input"]
                .as_array()
                .expect("input should be an array")
                .iter()
                .map(|text| keyword_vector(text.as_str().unwrap_or_default()))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({
                "model": EMBEDDING_MODEL,
                "embeddings": embeddings,
            }))
        })
        .mount(server)
        .await;
}

fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    }))
}

/// Enhancement prompts get the question back as the refined query; answer
/// prompts are answered from the first passage in context. Any prompt whose
/// question mentions "forbidden" is rejected with 403.
pub async fn mount_gemini(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r":generateContent$"))
        .respond_with(|request: &Request| {
            let body: Value = request.body_json().expect("generate request should be JSON");
            let prompt = body["contents"][0]["parts"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let question = prompt.rsplit("Question: ").next().unwrap_or_default();

            if question.contains("forbidden") {
                return ResponseTemplate::new(403).set_body_json(json!({
                    "error": { "code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED" }
                }));
            }

            if prompt.contains("refined_query") {
                return gemini_reply(&json!({ "refined_query": question }).to_string());
            }

            let first_block = prompt
                .split("Passages:\n")
                .nth(1)
                .and_then(|context| context.split("\n\n").next())
                .unwrap_or_default();
            let id = first_block
                .strip_prefix('[')
                .and_then(|rest| rest.split(']').next())
                .unwrap_or_default();
            let text = first_block.rsplit(") ").next().unwrap_or_default();

            gemini_reply(
                &json!({
                    "answer": format!("According to the policy document, {}", text),
                    "citations": [id],
                    "confidence": 0.9,
                    "grounded": true,
                })
                .to_string(),
            )
        })
        .mount(server)
        .await;
}

/// Remote index that answers every call with 503
pub async fn mount_unavailable_remote(server: &MockServer) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream connect error"))
        .mount(server)
        .await;
}

pub fn test_config(
    ollama: &MockServer,
    gemini: &MockServer,
    remote: Option<&MockServer>,
    base_dir: &Path,
) -> Config {
    Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: ollama.address().ip().to_string(),
            port: ollama.address().port(),
            model: EMBEDDING_MODEL.to_string(),
            batch_size: 16,
            embedding_dimension: u32::try_from(VOCABULARY.len() + 1).expect("small dimension"),
        },
        llm: LlmConfig {
            base_url: gemini.uri(),
            model: LANGUAGE_MODEL.to_string(),
            api_key: Some("test-gemini-key".to_string()),
            ..LlmConfig::default()
        },
        remote_index: remote.map(|server| RemoteIndexConfig {
            host: server.uri(),
            api_key: Some("test-pinecone-key".to_string()),
            timeout_seconds: 5,
            ..RemoteIndexConfig::default()
        }),
        pacing: PacingConfig {
            min_call_interval_ms: 0,
            question_interval_ms: 0,
            requests_per_minute: 0,
            max_retries: 1,
            backoff_base_ms: 1,
            backoff_max_ms: 1,
        },
        retrieval: RetrievalConfig::default(),
        base_dir: base_dir.to_path_buf(),
    }
}

pub async fn embed_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == "/api/embed")
        .count()
}
