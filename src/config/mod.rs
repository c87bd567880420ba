// Configuration management module
// TOML settings with environment overrides for secrets

pub mod settings;

#[cfg(test)]
mod tests;

use anyhow::Result;
use console::style;
use std::path::Path;

pub use settings::{
    Config, ConfigError, LlmConfig, OllamaConfig, PacingConfig, RemoteIndexConfig,
    RetrievalConfig,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}

/// Print the effective configuration, with secrets masked
#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir)?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embeddings (Ollama):").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!();

    eprintln!("{}", style("Language Model:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.llm.base_url).cyan());
    eprintln!("  Model: {}", style(&config.llm.model).cyan());
    eprintln!("  API Key: {}", mask_secret(config.llm.api_key.as_deref()));
    eprintln!(
        "  Max Output Tokens: {}",
        style(config.llm.max_output_tokens).cyan()
    );
    eprintln!("  Temperature: {}", style(config.llm.temperature).cyan());
    eprintln!();

    eprintln!("{}", style("Vector Index:").bold().yellow());
    match &config.remote_index {
        Some(remote) => {
            eprintln!("  Backend: {} (local fallback)", style("remote").cyan());
            eprintln!("  Host: {}", style(&remote.host).cyan());
            eprintln!("  API Key: {}", mask_secret(remote.api_key.as_deref()));
        }
        None => eprintln!("  Backend: {}", style("local (in-process)").cyan()),
    }
    eprintln!();

    eprintln!("{}", style("Pacing:").bold().yellow());
    eprintln!(
        "  Min Call Interval: {}ms",
        style(config.pacing.min_call_interval_ms).cyan()
    );
    eprintln!(
        "  Question Interval: {}ms",
        style(config.pacing.question_interval_ms).cyan()
    );
    eprintln!(
        "  Requests Per Minute: {}",
        style(config.pacing.requests_per_minute).cyan()
    );
    eprintln!("  Max Retries: {}", style(config.pacing.max_retries).cyan());
    eprintln!();

    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        Some(value) if value.chars().count() > 8 => {
            let tail: String = value.chars().skip(value.chars().count() - 4).collect();
            style(format!("****{}", tail)).cyan().to_string()
        }
        Some(_) => style("****").cyan().to_string(),
        None => style("not set").red().to_string(),
    }
}
