use anyhow::Result;
use clap::{Parser, Subcommand};
use docqa::commands::{ask, init_config, serve_mcp};
use docqa::config::{get_config_dir, show_config};
use docqa::synthesis::DocumentType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Answer questions about documents with cited, confidence-scored answers")]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.docqa)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file, or show the current one
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Answer questions about a document
    Ask {
        /// Extracted document: .json passages or plain text
        file: PathBuf,
        /// Question to answer; repeat for several
        #[arg(short, long = "question", required = true)]
        questions: Vec<String>,
        /// Skip document type detection
        #[arg(long)]
        document_type: Option<DocumentType>,
        /// Print answers as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start MCP server on stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                init_config(&config_dir)?;
            }
        }
        Commands::Ask {
            file,
            questions,
            document_type,
            json,
        } => {
            ask(&config_dir, &file, &questions, document_type, json).await?;
        }
        Commands::Serve => {
            serve_mcp(&config_dir).await?;
        }
    }

    Ok(())
}
