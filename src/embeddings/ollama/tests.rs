use super::*;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    OllamaConfig {
        protocol: "http".to_string(),
        host: server.address().ip().to_string(),
        port: server.address().port(),
        model: "test-model".to_string(),
        batch_size: 2,
        embedding_dimension: 3,
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
    };
    let client = OllamaClient::new(&config).expect("should create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(EmbeddingProvider::dimension(&client), 384);
    assert_eq!(client.max_batch_size(), 128);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("should create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(0);

    assert_eq!(client.retry_attempts, 1, "at least one attempt is made");
}

#[tokio::test]
async fn embed_splits_into_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(
            serde_json::json!({ "model": "test-model", "input": ["a", "b"] }),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({ "input": ["c"] })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[0.0, 0.0, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("should create client");
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = client.embed(&texts).await.expect("should embed");

    assert_eq!(
        vectors,
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0]
        ]
    );
}

#[tokio::test]
async fn count_mismatch_is_an_embedding_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "embeddings": [[1.0, 0.0, 0.0]] })),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("should create client");
    let result = client.embed(&["a".to_string(), "b".to_string()]).await;

    assert!(matches!(result, Err(QaError::Embedding(_))));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("should create client");
    let result = client.embed(&["a".to_string()]).await;

    assert!(matches!(result, Err(QaError::Embedding(_))));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))
        .expect("should create client")
        .with_retry_attempts(2);
    let result = client.embed(&["a".to_string()]).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn health_check_requires_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "other-model" }]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server)).expect("should create client");
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(result.is_err());
}
