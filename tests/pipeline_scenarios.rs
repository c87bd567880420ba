//! End-to-end question answering against mocked embedding, language model and
//! remote index services.

mod common;

use common::*;
use docqa::document::Document;
use docqa::pipeline::{AnswerStatus, Pipeline};
use docqa::synthesis::INSUFFICIENT_CONTEXT_ANSWER;
use docqa::vector_store::BackendKind;
use tempfile::TempDir;
use wiremock::MockServer;

struct Services {
    ollama: MockServer,
    gemini: MockServer,
    _dir: TempDir,
    pipeline: Pipeline,
}

async fn services(remote: Option<&MockServer>) -> Services {
    let ollama = MockServer::start().await;
    let gemini = MockServer::start().await;
    mount_ollama(&ollama).await;
    mount_gemini(&gemini).await;

    let dir = TempDir::new().expect("should create temp dir");
    let config = test_config(&ollama, &gemini, remote, dir.path());
    let pipeline = Pipeline::from_config(&config).expect("should build pipeline");

    Services {
        ollama,
        gemini,
        _dir: dir,
        pipeline,
    }
}

fn questions(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| (*t).to_string()).collect()
}

#[tokio::test]
async fn grace_period_is_answered_with_citation() {
    let services = services(None).await;
    let document = policy_document();

    let answers = services
        .pipeline
        .answer_document(
            &document,
            &questions(&["What is the grace period for premium payment?"]),
            None,
        )
        .await
        .expect("should answer");

    let answer = &answers[0];
    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(answer.answer.contains("thirty days"), "answer: {}", answer.answer);
    assert_eq!(answer.citations, vec![document.passages[0].id.clone()]);
    assert!(answer.confidence > 0.5, "confidence: {}", answer.confidence);
    assert!(answer.confidence <= 1.0);
}

#[tokio::test]
async fn unrelated_question_reports_insufficient_context() {
    let services = services(None).await;

    let answers = services
        .pipeline
        .answer_document(
            &policy_document(),
            &questions(&["What is the capital of France?"]),
            None,
        )
        .await
        .expect("should answer");

    let answer = &answers[0];
    assert_eq!(answer.status, AnswerStatus::InsufficientContext);
    assert_eq!(answer.answer, INSUFFICIENT_CONTEXT_ANSWER);
    assert!(answer.citations.is_empty());
    assert!(answer.confidence <= 0.1);

    // only the query enhancement reached the model
    let calls = services
        .gemini
        .received_requests()
        .await
        .unwrap_or_default()
        .len();
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn one_failing_question_of_five_is_degraded() {
    let services = services(None).await;
    let asked = questions(&[
        "What is the grace period for premium payment?",
        "What is the waiting period for maternity expenses?",
        "forbidden: is cataract surgery covered?",
        "What is the waiting period for pre-existing diseases?",
        "How much of cataract surgery is covered?",
    ]);

    let answers = services
        .pipeline
        .answer_document(&policy_document(), &asked, None)
        .await
        .expect("should answer");

    assert_eq!(answers.len(), 5);
    for (answer, question) in answers.iter().zip(&asked) {
        assert_eq!(&answer.question, question);
    }

    let degraded: Vec<usize> = answers
        .iter()
        .enumerate()
        .filter(|(_, a)| matches!(a.status, AnswerStatus::Degraded { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(degraded, vec![2]);
    assert_eq!(answers[2].confidence, 0.0);
    assert!(
        answers
            .iter()
            .filter(|a| a.status == AnswerStatus::Answered)
            .all(|a| !a.citations.is_empty())
    );
}

#[tokio::test]
async fn remote_outage_falls_back_to_local_index() {
    let remote = MockServer::start().await;
    mount_unavailable_remote(&remote).await;
    let services = services(Some(&remote)).await;

    let answers = services
        .pipeline
        .answer_document(
            &policy_document(),
            &questions(&["What is the grace period for premium payment?"]),
            None,
        )
        .await
        .expect("should answer despite remote outage");

    assert_eq!(answers[0].status, AnswerStatus::Answered);

    let status = services.pipeline.status();
    assert_eq!(status.preferred_backend, BackendKind::Remote);
    assert_eq!(status.backend_in_use, BackendKind::Local);
    assert_eq!(status.degraded_builds, 1);
    assert_eq!(status.index_count, 1);
}

#[tokio::test]
async fn repeated_requests_reuse_the_index() {
    let services = services(None).await;
    let document = policy_document();
    let asked = questions(&[
        "What is the waiting period for maternity expenses?",
        "How much of cataract surgery is covered?",
    ]);

    let first = services
        .pipeline
        .answer_document(&document, &asked, None)
        .await
        .expect("should answer");
    let after_first = embed_requests(&services.ollama).await;
    // one build batch plus one query embedding per question
    assert_eq!(after_first, 1 + asked.len());

    let second = services
        .pipeline
        .answer_document(&document, &asked, None)
        .await
        .expect("should answer");
    let after_second = embed_requests(&services.ollama).await;
    assert_eq!(after_second - after_first, asked.len());

    assert_eq!(first, second);
    assert_eq!(services.pipeline.status().index_count, 1);
}

#[tokio::test]
async fn answer_count_matches_question_count() {
    let services = services(None).await;
    let document = policy_document();
    let pool = [
        "What is the grace period for premium payment?",
        "What is the capital of France?",
        "forbidden question about maternity",
        "   ",
        "How much of cataract surgery is covered?",
    ];

    for count in 0..=pool.len() {
        let asked = questions(&pool[..count]);
        let answers = services
            .pipeline
            .answer_document(&document, &asked, None)
            .await
            .expect("should answer");

        assert_eq!(answers.len(), asked.len());
        for (answer, question) in answers.iter().zip(&asked) {
            assert_eq!(&answer.question, question);
        }
    }
}

#[tokio::test]
async fn three_passage_policy_grounds_one_question_and_declines_another() {
    let services = services(None).await;
    let document = Document::from_texts(
        "three-passages",
        [
            ("grace period is thirty days", None),
            ("waiting period is 36 months", None),
            ("maternity is excluded except ectopic pregnancy", None),
        ],
    )
    .expect("should build document");

    let answers = services
        .pipeline
        .answer_document(
            &document,
            &questions(&[
                "What is the grace period for premium payment?",
                "What is the capital of France?",
            ]),
            None,
        )
        .await
        .expect("should answer");

    let grace = &answers[0];
    assert_eq!(grace.status, AnswerStatus::Answered);
    assert_eq!(grace.citations, vec![document.passages[0].id.clone()]);
    assert!(grace.confidence > 0.0);

    let france = &answers[1];
    assert_eq!(france.status, AnswerStatus::InsufficientContext);
    assert_eq!(france.answer, INSUFFICIENT_CONTEXT_ANSWER);
    assert!(france.citations.is_empty());
    assert!(france.confidence < grace.confidence);
    assert!(france.confidence <= 0.1);
}
