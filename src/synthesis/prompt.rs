//! Document-type aware prompt construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::document::{Passage, PassageId};
use crate::retrieval::{RetrievalResult, ScoredPassage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Insurance,
    Legal,
    Scientific,
    #[default]
    General,
}

const INSURANCE_KEYWORDS: [&str; 6] = [
    "policy",
    "premium",
    "insured",
    "coverage",
    "beneficiary",
    "claim",
];
const LEGAL_KEYWORDS: [&str; 6] = ["constitution", "article", "section", "law", "court", "legal"];
const SCIENTIFIC_KEYWORDS: [&str; 6] = [
    "theorem",
    "principle",
    "mathematical",
    "physics",
    "equation",
    "law of",
];

impl DocumentType {
    /// Guess the type from keyword frequency; `General` when nothing matches.
    #[inline]
    pub fn detect(passages: &[Passage]) -> Self {
        let text = passages
            .iter()
            .map(|p| p.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let count = |keywords: &[&str]| -> usize {
            keywords.iter().map(|kw| text.matches(kw).count()).sum()
        };

        let candidates = [
            (Self::Insurance, count(&INSURANCE_KEYWORDS)),
            (Self::Legal, count(&LEGAL_KEYWORDS)),
            (Self::Scientific, count(&SCIENTIFIC_KEYWORDS)),
        ];

        // first maximum wins ties
        candidates
            .into_iter()
            .fold((Self::General, 0), |best, (kind, hits)| {
                if hits > best.1 { (kind, hits) } else { best }
            })
            .0
    }

    /// Insurance and legal answers must point at the clause they rely on.
    #[inline]
    pub fn strict_citations(self) -> bool {
        matches!(self, Self::Insurance | Self::Legal)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insurance => "insurance",
            Self::Legal => "legal",
            Self::Scientific => "scientific",
            Self::General => "general",
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Self::Insurance => {
                "This is an insurance policy. Quote exact amounts, percentages, waiting periods, \
                 limits and conditions, and name the clause or section they come from."
            }
            Self::Legal => {
                "This is a legal text. Refer to the exact article, section or clause, and keep \
                 the legal meaning precise without paraphrasing it away."
            }
            Self::Scientific => {
                "This is a scientific text. State principles, laws and equations precisely, \
                 including the conditions under which they hold."
            }
            Self::General => "Answer directly and precisely from the passages.",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insurance" => Ok(Self::Insurance),
            "legal" => Ok(Self::Legal),
            "scientific" => Ok(Self::Scientific),
            "general" => Ok(Self::General),
            other => Err(format!(
                "unknown document type '{}' (expected insurance, legal, scientific or general)",
                other
            )),
        }
    }
}

#[inline]
pub fn enhancement_prompt(question: &str, document_type: DocumentType) -> String {
    format!(
        "Rewrite the question below as a short search query for finding the relevant passages \
         in a {} document. Keep every specific term, number and name from the question and \
         add close synonyms only where they help.\n\
         Respond with JSON only: {{\"refined_query\": \"...\"}}\n\n\
         Question: {}",
        document_type, question
    )
}

/// Prompt asking for a cited JSON answer. `after_parse_failure` adds a
/// stricter reminder about the output format.
#[inline]
pub fn answer_prompt(
    question: &str,
    context: &str,
    document_type: DocumentType,
    after_parse_failure: bool,
) -> String {
    let citation_rule = if document_type.strict_citations() {
        "Cite the id of every passage you rely on; an answer without a citation is not acceptable."
    } else {
        "Cite the ids of the passages you used."
    };

    let mut prompt = format!(
        "You answer questions about a {document_type} document using only the passages below.\n\
         {instructions}\n\n\
         Rules:\n\
         - Use only facts stated in the passages. If they do not answer the question, say so \
         and set \"grounded\" to false.\n\
         - {citation_rule}\n\
         - \"confidence\" is a number between 0 and 1 expressing how sure you are that the \
         answer is correct and complete.\n\n\
         Respond with a single JSON object:\n\
         {{\"answer\": \"...\", \"citations\": [\"<passage id>\"], \"confidence\": 0.0, \"grounded\": true}}\n",
        instructions = document_type.instructions(),
    );

    if after_parse_failure {
        prompt.push_str(
            "Your previous reply could not be parsed. Output only the JSON object, with no \
             markdown fences and no text before or after it.\n",
        );
    }

    prompt.push_str("\nPassages:\n");
    prompt.push_str(context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt
}

/// Passages rendered for the model, and which of them survived truncation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub text: String,
    pub shown: Vec<PassageId>,
}

impl PromptContext {
    #[inline]
    pub fn shows(&self, id: &PassageId) -> bool {
        self.shown.contains(id)
    }
}

/// Render the best `max_passages` passages as `[id] (page n) text` blocks,
/// truncated to `max_chars`.
#[inline]
pub fn build_context(
    retrieval: &RetrievalResult,
    max_passages: usize,
    max_chars: usize,
) -> PromptContext {
    let rendered: Vec<&ScoredPassage> = retrieval.iter().take(max_passages).collect();
    let context = rendered
        .iter()
        .map(|scored| match scored.passage.page {
            Some(page) => format!(
                "[{}] (page {}) {}",
                scored.passage.id, page, scored.passage.text
            ),
            None => format!("[{}] {}", scored.passage.id, scored.passage.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let text = truncate_text(&context, max_chars);
    let shown = rendered
        .iter()
        .map(|scored| &scored.passage.id)
        .filter(|id| text.contains(&format!("[{}]", id)))
        .cloned()
        .collect();

    PromptContext { text, shown }
}

/// Cut `text` to at most `max_chars` characters, preferring the end of a
/// sentence in the second half, then a word boundary (marked with `...`).
#[inline]
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(index, _)| index);
    let head = &text[..cut];

    if let Some(end) = head
        .rfind(['.', '!', '?'])
        .filter(|&end| end > head.len() / 2)
    {
        return head[..=end].to_string();
    }

    match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => format!("{}...", head[..space].trim_end()),
        _ => format!("{}...", head),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::retrieval::ScoredPassage;

    fn passages(texts: &[&str]) -> Vec<Passage> {
        Document::from_texts("test", texts.iter().map(|t| (*t, None)))
            .expect("should build document")
            .passages
    }

    #[test]
    fn detects_document_types() {
        assert_eq!(
            DocumentType::detect(&passages(&[
                "The insured must pay the premium before the policy renews.",
                "A claim is settled within 30 days."
            ])),
            DocumentType::Insurance
        );
        assert_eq!(
            DocumentType::detect(&passages(&["Article 21 of the Constitution protects life."])),
            DocumentType::Legal
        );
        assert_eq!(
            DocumentType::detect(&passages(&["Newton's law of motion and the equation F = ma."])),
            DocumentType::Scientific
        );
        assert_eq!(
            DocumentType::detect(&passages(&["A recipe for bread."])),
            DocumentType::General
        );
    }

    #[test]
    fn strictness_and_parsing() {
        assert!(DocumentType::Insurance.strict_citations());
        assert!(DocumentType::Legal.strict_citations());
        assert!(!DocumentType::Scientific.strict_citations());
        assert!(!DocumentType::General.strict_citations());

        assert_eq!("Legal".parse::<DocumentType>(), Ok(DocumentType::Legal));
        assert!("poetry".parse::<DocumentType>().is_err());
    }

    #[test]
    fn truncation_prefers_sentence_then_word() {
        let text = "First sentence here. Second sentence is longer than the limit";
        assert_eq!(truncate_text(text, 100), text);
        assert_eq!(truncate_text(text, 30), "First sentence here.");

        let words = "alpha beta gamma delta epsilon";
        assert_eq!(truncate_text(words, 14), "alpha beta...");

        assert_eq!(truncate_text("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "₹₹₹₹₹₹₹₹₹₹";
        assert_eq!(truncate_text(text, 3), "₹₹₹...");
    }

    #[test]
    fn context_lists_ids_and_pages() {
        let document = Document::from_texts(
            "test",
            [("Grace period is 30 days.", Some(4)), ("Unrelated.", None)],
        )
        .expect("should build document");
        let retrieval = RetrievalResult::ranked(
            document.passages.iter().map(|p| ScoredPassage {
                passage: p.clone(),
                score: 0.5,
            }),
            2,
        );

        let context = build_context(&retrieval, 1, 1000);
        assert_eq!(
            context.text,
            format!("[{}] (page 4) Grace period is 30 days.", document.passages[0].id)
        );
        assert_eq!(context.shown, vec![document.passages[0].id.clone()]);
        assert!(!context.shows(&document.passages[1].id));
    }

    #[test]
    fn truncated_passages_are_not_shown() {
        let document = Document::from_texts(
            "test",
            [
                ("The grace period for premium payment is thirty days.", None),
                ("Maternity cover starts after a waiting period of two years.", None),
            ],
        )
        .expect("should build document");
        let retrieval = RetrievalResult::ranked(
            document.passages.iter().map(|p| ScoredPassage {
                passage: p.clone(),
                score: 0.5,
            }),
            2,
        );

        let context = build_context(&retrieval, 2, 80);
        assert!(context.shows(&document.passages[0].id));
        assert!(!context.shows(&document.passages[1].id));
        assert!(!context.text.contains(document.passages[1].id.as_str()));
    }

    #[test]
    fn answer_prompt_mentions_strictness() {
        let strict = answer_prompt("q", "ctx", DocumentType::Insurance, true);
        assert!(strict.contains("not acceptable"));
        assert!(strict.contains("could not be parsed"));
        assert!(strict.ends_with("Question: q"));

        let relaxed = answer_prompt("q", "ctx", DocumentType::General, false);
        assert!(!relaxed.contains("not acceptable"));
        assert!(!relaxed.contains("could not be parsed"));
    }
}
