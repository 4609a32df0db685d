use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming document summarizer
#[derive(Debug, Parser)]
#[command(name = "digest")]
#[command(version)]
#[command(about = "Summarize documents with Gemini or Perplexity, streamed", long_about = None)]
pub struct Args {
    /// Model id; ids starting with "gemini" use Gemini, anything else Perplexity
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<String>,

    /// Instructions for the model (default: config system_prompt)
    #[arg(short = 's', long = "system", global = true)]
    pub system: Option<String>,

    /// Plain-text document to summarize; PROMPT then becomes the instructions
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Let the model ground its answer with web search (Gemini only)
    #[arg(long = "grounded")]
    pub grounded: bool,

    /// Ask for JSON instead of Markdown (Gemini only)
    #[arg(long = "json")]
    pub json: bool,

    /// Print every chunk as one JSON line instead of plain text
    #[arg(long = "ndjson")]
    pub ndjson: bool,

    /// Proxy base URL (default: config proxy_url)
    #[arg(long = "proxy-url", global = true)]
    pub proxy_url: Option<String>,

    /// Use the offline stub backend instead of a provider
    #[arg(long = "stub", global = true)]
    pub stub: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a short title for a document
    Title {
        /// Plain-text document
        file: PathBuf,
    },
    /// Generate question/answer flashcards for a document, printed as JSON
    Flashcards {
        /// Plain-text document
        file: PathBuf,

        /// How many cards to ask for
        #[arg(short = 'n', long = "count", default_value_t = 10)]
        count: usize,
    },
}
