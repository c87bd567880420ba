use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::document::Document;
use crate::embeddings::OllamaClient;
use crate::mcp::McpServer;
use crate::mcp::tools::{AnswerQuestionsHandler, PipelineStatusHandler};
use crate::pipeline::{AnswerRecord, AnswerStatus, Pipeline};
use crate::synthesis::DocumentType;

/// Write a default `config.toml` unless one already exists
#[inline]
pub fn init_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let path = config.config_file_path();

    if path.exists() {
        println!(
            "Configuration already exists at {}",
            style(path.display()).cyan()
        );
    } else {
        config.save()?;
        println!(
            "✅ Wrote default configuration to {}",
            style(path.display()).cyan()
        );
    }
    println!("Use 'docqa config --show' to review the effective settings.");
    Ok(())
}

/// Answer questions about a document file and print the results
#[inline]
pub async fn ask(
    config_dir: &Path,
    file: &Path,
    questions: &[String],
    document_type: Option<DocumentType>,
    json: bool,
) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let document = Document::load(file)?;

    check_embedding_service(&config).await;
    let pipeline = Pipeline::from_config(&config)?;

    let answers = pipeline
        .answer_document(&document, questions, document_type)
        .await?;

    if json {
        let output = serde_json::json!({
            "document": {
                "source": document.source,
                "fingerprint": document.fingerprint,
                "passages": document.passages.len(),
            },
            "answers": answers,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_answers(&answers);
    }

    Ok(())
}

fn print_answers(answers: &[AnswerRecord]) {
    for (index, record) in answers.iter().enumerate() {
        println!(
            "{} {}",
            style(format!("Q{}.", index + 1)).bold().cyan(),
            style(&record.question).bold()
        );
        println!("   {}", record.answer);

        let confidence = format!("{:.2}", record.confidence);
        let confidence = match record.status {
            AnswerStatus::Answered if record.confidence >= 0.5 => style(confidence).green(),
            AnswerStatus::Answered => style(confidence).yellow(),
            AnswerStatus::InsufficientContext | AnswerStatus::Degraded { .. } => {
                style(confidence).red()
            }
        };
        println!("   Confidence: {}", confidence);

        if !record.citations.is_empty() {
            let citations: Vec<&str> = record.citations.iter().map(|c| c.as_str()).collect();
            println!("   Sources: {}", style(citations.join(", ")).dim());
        }

        if let AnswerStatus::Degraded { reason } = &record.status {
            println!("   {} {}", style("Degraded:").red().bold(), reason);
        }
        println!();
    }
}

/// Warn early when Ollama is not usable; the pipeline reports the real error
async fn check_embedding_service(config: &Config) {
    let client = match OllamaClient::new(&config.ollama) {
        Ok(client) => client,
        Err(e) => {
            warn!("Cannot create Ollama client: {}", e);
            return;
        }
    };

    match tokio::task::spawn_blocking(move || client.health_check()).await {
        Ok(Ok(())) => info!(
            "Ollama ready at {}:{} with model {}",
            config.ollama.host, config.ollama.port, config.ollama.model
        ),
        Ok(Err(e)) => {
            warn!("Ollama is not ready: {}", e);
            eprintln!(
                "Warning: Ollama at {}:{} is not ready ({}). Indexing will fail until it is.",
                config.ollama.host, config.ollama.port, e
            );
        }
        Err(e) => warn!("Ollama health check did not complete: {}", e),
    }
}

/// Start the MCP server on stdio
#[inline]
pub async fn serve_mcp(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    check_embedding_service(&config).await;

    let pipeline = Arc::new(Pipeline::from_config(&config).context("Failed to build pipeline")?);

    let server = Arc::new(McpServer::new(
        "docqa".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
        "Answers questions about documents with cited, confidence-scored answers".to_string(),
    ));
    server
        .register_tool(
            AnswerQuestionsHandler::tool_definition(),
            AnswerQuestionsHandler::new(Arc::clone(&pipeline)),
        )
        .await;
    server
        .register_tool(
            PipelineStatusHandler::tool_definition(),
            PipelineStatusHandler::new(Arc::clone(&pipeline)),
        )
        .await;

    // stdout carries the protocol, so all human output goes to stderr
    eprintln!("✅ MCP server initialized with tools: answer_questions, pipeline_status");
    eprintln!("Note: This server uses stdio transport. Connect via MCP client.");

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            if let Err(e) = result {
                error!("MCP server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n📴 Received interrupt signal, shutting down...");
        }
    }

    let status = pipeline.status();
    info!(
        "Served {} language model calls across {} indexes",
        status.rate_budget.calls_issued, status.index_count
    );
    Ok(())
}
