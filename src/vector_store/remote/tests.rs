use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, batch_size: usize) -> PineconeClient {
    PineconeClient::new(&RemoteIndexConfig {
        host: server.uri(),
        api_key: Some("test-key".to_string()),
        upsert_batch_size: batch_size,
        timeout_seconds: 5,
    })
    .expect("should create client")
    .with_retry_attempts(1)
}

fn vector(id: &str) -> RemoteVector {
    RemoteVector {
        id: id.to_string(),
        values: vec![0.5, 0.5],
        metadata: serde_json::json!({ "ordinal": 0 }),
    }
}

#[test]
fn rejects_invalid_host() {
    let result = PineconeClient::new(&RemoteIndexConfig {
        host: "not a host".to_string(),
        ..RemoteIndexConfig::default()
    });
    assert!(result.is_err());
}

#[tokio::test]
async fn describe_sends_api_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/describe_index_stats"))
        .and(header("Api-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "dimension": 768,
            "namespaces": {},
            "totalVectorCount": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 100);
    let dimension = tokio::task::spawn_blocking(move || client.describe_dimension())
        .await
        .expect("task should join")
        .expect("should describe index");

    assert_eq!(dimension, 768);
}

#[tokio::test]
async fn upsert_batches_vectors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .and(body_partial_json(serde_json::json!({ "namespace": "doc-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "upsertedCount": 2 })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "upsertedCount": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let written = tokio::task::spawn_blocking(move || {
        client.upsert("doc-1", &[vector("a"), vector("b"), vector("c")])
    })
    .await
    .expect("task should join")
    .expect("should upsert");

    assert_eq!(written, 3);
}

#[tokio::test]
async fn query_parses_matches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(serde_json::json!({
            "topK": 2,
            "namespace": "doc-1",
            "includeMetadata": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "matches": [
                { "id": "a", "score": 0.91, "metadata": { "ordinal": 0 } },
                { "id": "b", "score": 0.42 }
            ],
            "namespace": "doc-1"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 100);
    let matches = tokio::task::spawn_blocking(move || client.query("doc-1", &[1.0, 0.0], 2))
        .await
        .expect("task should join")
        .expect("should query");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, "a");
    assert!((matches[1].score - 0.42).abs() < 1e-6);
}

#[tokio::test]
async fn unauthorized_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/vectors/delete"))
        .and(body_partial_json(serde_json::json!({ "deleteAll": true })))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 100);
    let result = tokio::task::spawn_blocking(move || client.delete_namespace("doc-1"))
        .await
        .expect("task should join");

    assert!(result.is_err());
}
