use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn fingerprint_is_content_derived() {
    let a = DocumentFingerprint::from_texts(["grace period", "waiting period"]);
    let b = DocumentFingerprint::from_texts(["grace period", "waiting period"]);
    let c = DocumentFingerprint::from_texts(["grace periodwaiting period"]);

    assert_eq!(a, b);
    assert_ne!(a, c, "passage boundaries are part of the fingerprint");
    assert_eq!(a.as_str().len(), 64);
    assert_eq!(a.short().len(), 12);
}

#[test]
fn page_numbers_are_part_of_the_fingerprint() {
    let first = Document::from_texts("a", [("grace period", Some(1)), ("waiting period", Some(2))])
        .expect("should build document");
    let moved = Document::from_texts("b", [("grace period", Some(1)), ("waiting period", Some(3))])
        .expect("should build document");
    let same = Document::from_texts("c", [("grace period", Some(1)), ("waiting period", Some(2))])
        .expect("should build document");
    let unpaged = Document::from_texts("d", [("grace period", None), ("waiting period", None)])
        .expect("should build document");

    assert_ne!(first.fingerprint, moved.fingerprint);
    assert_eq!(first.fingerprint, same.fingerprint);
    assert_ne!(first.fingerprint, unpaged.fingerprint);
    assert_eq!(
        unpaged.fingerprint,
        DocumentFingerprint::from_texts(["grace period", "waiting period"])
    );
}

#[test]
fn passage_ids_are_stable() {
    let fingerprint = DocumentFingerprint::from("0123456789abcdef".to_string());
    let id = PassageId::new(&fingerprint, 7);
    assert_eq!(id.as_str(), "0123456789ab-0007");
    assert_eq!(id, PassageId::new(&fingerprint, 7));
}

#[test]
fn from_texts_normalizes_and_drops_empty() {
    let document = Document::from_texts(
        "inline",
        [
            ("  grace   period\n is thirty days ", Some(1)),
            ("   ", Some(1)),
            ("waiting period", None),
        ],
    )
    .expect("should build document");

    assert_eq!(document.passages.len(), 2);
    assert_eq!(document.passages[0].text, "grace period is thirty days");
    assert_eq!(document.passages[0].page, Some(1));
    assert_eq!(document.passages[1].ordinal, 1);
    assert_eq!(document.passages[1].document, document.fingerprint);
}

#[test]
fn empty_document_is_an_ingestion_error() {
    let result = Document::from_texts("empty", [("", None::<u32>), ("  \n", None)]);
    assert!(matches!(result, Err(QaError::Ingestion(_))));
}

#[test]
fn plain_text_pages_and_paragraphs() {
    let content = "Section 1\nGrace period is thirty days.\n\nWaiting period is 36 months.\n\u{c}Maternity is excluded.\n";
    let document = Document::from_plain_text("policy.txt", content).expect("should parse");

    let texts: Vec<_> = document.passages.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(
        texts,
        [
            "Section 1 Grace period is thirty days.",
            "Waiting period is 36 months.",
            "Maternity is excluded."
        ]
    );
    assert_eq!(document.passages[1].page, Some(1));
    assert_eq!(document.passages[2].page, Some(2));
}

#[test]
fn json_accepts_strings_and_objects() {
    let document = Document::from_json(
        "passages.json",
        r#"["first passage", {"text": "second passage", "page": 4}]"#,
    )
    .expect("should parse json");

    assert_eq!(document.passages.len(), 2);
    assert_eq!(document.passages[0].page, None);
    assert_eq!(document.passages[1].page, Some(4));
}

#[test]
fn invalid_json_is_an_ingestion_error() {
    let result = Document::from_json("broken.json", "{not json");
    assert!(matches!(result, Err(QaError::Ingestion(_))));
}

#[test]
fn load_from_disk() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let json_path = temp_dir.path().join("doc.json");
    let text_path = temp_dir.path().join("doc.txt");
    fs::write(&json_path, r#"["alpha", "beta"]"#).expect("should write json");
    fs::write(&text_path, "alpha\n\nbeta\n").expect("should write text");

    let from_json = Document::load(&json_path).expect("should load json");
    let from_text = Document::load(&text_path).expect("should load text");

    assert_eq!(from_json.fingerprint, from_text.fingerprint);
    assert!(matches!(
        Document::load(&temp_dir.path().join("missing.txt")),
        Err(QaError::Ingestion(_))
    ));
}
