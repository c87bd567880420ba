//! Lenient extraction of the JSON object a model was asked to return.

use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default = "grounded_by_default")]
    pub grounded: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefinedQuery {
    pub refined_query: String,
}

fn grounded_by_default() -> bool {
    true
}

/// Parse the first JSON object in `reply`, tolerating markdown fences and
/// surrounding prose.
pub fn extract_json<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| "no JSON object in model reply".to_string())?;
    let end = trimmed
        .rfind('}')
        .filter(|&end| end > start)
        .ok_or_else(|| "unterminated JSON object in model reply".to_string())?;

    serde_json::from_str(&trimmed[start..=end]).map_err(|e| format!("invalid JSON object: {}", e))
}

pub fn parse_answer(reply: &str) -> Result<ModelAnswer, String> {
    let answer: ModelAnswer = extract_json(reply)?;
    if answer.answer.trim().is_empty() {
        return Err("model returned an empty answer".to_string());
    }
    Ok(answer)
}

pub fn parse_refined_query(reply: &str) -> Result<String, String> {
    let refined: RefinedQuery = extract_json(reply)?;
    let query = refined.refined_query.trim();
    if query.is_empty() {
        return Err("model returned an empty query".to_string());
    }
    Ok(query.to_string())
}
