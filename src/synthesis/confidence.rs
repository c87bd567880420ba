//! Confidence scoring for synthesized answers.

use fancy_regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Upper bound when the model says the passages do not answer the question
pub const UNGROUNDED_CAP: f32 = 0.15;

const INSUFFICIENT_CAP: f32 = 0.1;
const SPECIFIC_INDICATORS: [&str; 7] = [
    "₹",
    "%",
    "section",
    "article",
    "clause",
    "specifically",
    "mentioned",
];
const ATTRIBUTION_PHRASES: [&str; 4] = [
    "according to",
    "document states",
    "mentioned",
    "specified",
];

static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w']+\b").expect("valid regex"));
// amounts and durations such as "30", "1,00,000" or "2.5"
static NUMBER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<![\w.])\d[\d,]*(?:\.\d+)?").expect("valid regex"));

/// Heuristic quality of an answer's wording, in `[0, 1]`.
#[inline]
pub fn answer_quality(question: &str, answer: &str) -> f32 {
    let answer_chars = answer.chars().count();
    if answer_chars < 20 {
        return 0.0;
    }

    let lower = answer.to_lowercase();
    let mut score = 0.0;

    if answer_chars > 50 {
        score += 0.2;
    }

    let indicators = SPECIFIC_INDICATORS
        .iter()
        .filter(|indicator| lower.contains(*indicator))
        .count()
        + usize::from(NUMBER_REGEX.is_match(&lower).unwrap_or(false));
    score += (indicators as f32 / 5.0).min(0.3);

    let question_words: HashSet<String> = words(&question.to_lowercase())
        .filter(|word| word.chars().count() > 3)
        .collect();
    if !question_words.is_empty() {
        let answer_words: HashSet<String> = words(&lower).collect();
        let overlap = question_words.intersection(&answer_words).count();
        score += (overlap as f32 / question_words.len() as f32).min(0.3);
    }

    if ATTRIBUTION_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        score += 0.2;
    }

    f32::min(score, 1.0)
}

/// Blend the model's own estimate with retrieval evidence and answer quality,
/// then penalize answers that cite nothing valid.
#[inline]
pub fn combine(
    model_confidence: f32,
    best_score: f32,
    quality: f32,
    has_valid_citation: bool,
    strict_citations: bool,
) -> f32 {
    let blended = (0.4 * model_confidence.clamp(0.0, 1.0)
        + 0.4 * best_score.clamp(0.0, 1.0)
        + 0.2 * quality.clamp(0.0, 1.0))
    .clamp(0.0, 1.0);

    let factor = match (has_valid_citation, strict_citations) {
        (true, _) => 1.0,
        (false, true) => 0.3,
        (false, false) => 0.6,
    };

    blended * factor
}

/// Confidence for a question answered without a model call because nothing
/// relevant was retrieved.
#[inline]
pub fn insufficient(best_score: Option<f32>) -> f32 {
    (0.25 * best_score.unwrap_or(0.0).max(0.0)).min(INSUFFICIENT_CAP)
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD_REGEX
        .find_iter(text)
        .filter_map(Result::ok)
        .map(|m| m.as_str().to_string())
}
