//! MCP Tools Implementation
//!
//! `answer_questions` and `pipeline_status`, both backed by one shared pipeline.

use crate::document::Document;
use crate::mcp::protocol::*;
use crate::mcp::server::{InvalidParams, ToolHandler};
use crate::pipeline::Pipeline;
use crate::synthesis::DocumentType;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Question answering tool handler
pub struct AnswerQuestionsHandler {
    pipeline: Arc<Pipeline>,
}

/// Pipeline status tool handler
pub struct PipelineStatusHandler {
    pipeline: Arc<Pipeline>,
}

impl AnswerQuestionsHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "answer_questions".to_string(),
            description: Some(
                "Answer questions about a document with cited, confidence-scored answers"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "document": {
                        "type": "string",
                        "description": "Path to an extracted document (.json passages or plain text)"
                    },
                    "passages": {
                        "type": "array",
                        "description": "Inline passages: strings or {\"text\", \"page\"} objects",
                        "items": {
                            "anyOf": [
                                { "type": "string" },
                                {
                                    "type": "object",
                                    "properties": {
                                        "text": { "type": "string" },
                                        "page": { "type": "integer" }
                                    },
                                    "required": ["text"]
                                }
                            ]
                        }
                    },
                    "questions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Questions to answer, in order"
                    },
                    "document_type": {
                        "type": "string",
                        "enum": ["insurance", "legal", "scientific", "general"],
                        "description": "Optional: skip document type detection"
                    }
                },
                "required": ["questions"],
                "additionalProperties": false
            }),
        }
    }
}

/// Resolve the document named by the call, from a path or inline passages.
fn document_from_args(args: &HashMap<String, Value>) -> Result<Result<Document, String>> {
    match (args.get("document"), args.get("passages")) {
        (Some(_), Some(_)) => Err(InvalidParams(
            "Provide either 'document' or 'passages', not both".to_string(),
        )
        .into()),
        (Some(path), None) => {
            let path = path
                .as_str()
                .ok_or_else(|| InvalidParams("'document' must be a string".to_string()))?;
            Ok(Document::load(Path::new(path)).map_err(|e| e.to_string()))
        }
        (None, Some(passages)) => {
            if !passages.is_array() {
                return Err(InvalidParams("'passages' must be an array".to_string()).into());
            }
            Ok(Document::from_json("inline", &passages.to_string()).map_err(|e| e.to_string()))
        }
        (None, None) => Err(InvalidParams(
            "Missing required parameter: document or passages".to_string(),
        )
        .into()),
    }
}

fn questions_from_args(args: &HashMap<String, Value>) -> Result<Vec<String>> {
    let questions = args
        .get("questions")
        .and_then(Value::as_array)
        .ok_or_else(|| InvalidParams("Missing required parameter: questions".to_string()))?;

    questions
        .iter()
        .map(|q| {
            q.as_str()
                .map(str::to_string)
                .ok_or_else(|| InvalidParams("'questions' must contain only strings".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

#[async_trait]
impl ToolHandler for AnswerQuestionsHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let questions = questions_from_args(&args)?;
        let document_type = args
            .get("document_type")
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| "'document_type' must be a string".to_string())
                    .and_then(str::parse::<DocumentType>)
            })
            .transpose()
            .map_err(InvalidParams)?;

        let document = match document_from_args(&args)? {
            Ok(document) => document,
            Err(message) => {
                error!("Failed to load document: {}", message);
                return Ok(CallToolResult::error(message));
            }
        };

        debug!(
            "Answering {} questions about {} ({} passages)",
            questions.len(),
            document.source,
            document.passages.len()
        );

        match self
            .pipeline
            .answer_document(&document, &questions, document_type)
            .await
        {
            Ok(answers) => {
                let response = json!({
                    "document": {
                        "source": document.source,
                        "fingerprint": document.fingerprint,
                        "passages": document.passages.len(),
                    },
                    "answers": answers,
                });
                Ok(CallToolResult::text(serde_json::to_string_pretty(&response)?))
            }
            Err(e) => {
                error!("Error answering questions: {}", e);
                Ok(CallToolResult::error(format!("Request failed: {}", e)))
            }
        }
    }
}

impl PipelineStatusHandler {
    #[inline]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "pipeline_status".to_string(),
            description: Some(
                "Show the vector backend in use, cached indexes and rate budget headroom"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for PipelineStatusHandler {
    #[inline]
    async fn handle(&self, _params: CallToolParams) -> Result<CallToolResult> {
        debug!("Reporting pipeline status");
        let status = self.pipeline.status();
        Ok(CallToolResult::text(serde_json::to_string_pretty(&status)?))
    }
}
