//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kbrecall",
    version,
    author = "neur0map",
    about = "Knowledge-base retrieval and ranking for retrieval-augmented generation",
    long_about = "kbrecall recalls knowledge-base chunks with dense vector and full-text search, \
                  fuses the ranked lists with reciprocal rank fusion, optionally reranks them with \
                  a cross-encoder and trims the result to a token budget."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/kbrecall/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search one or more datasets
    Search {
        /// Search query text
        query: String,

        /// Team owning the datasets
        #[arg(short, long)]
        team: String,

        /// Dataset to search (repeatable)
        #[arg(short, long = "dataset", required = true)]
        datasets: Vec<String>,

        /// Token budget for the returned chunks
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity for the authoritative score
        #[arg(short, long, default_value = "0")]
        similarity: f64,

        /// Search mode: embedding, fullTextRecall or mixedRecall
        #[arg(short, long)]
        mode: Option<String>,

        /// Rerank candidates with the configured cross-encoder
        #[arg(long)]
        rerank: bool,

        /// Additional query variant (repeatable)
        #[arg(short = 'x', long = "extension")]
        extensions: Vec<String>,

        /// Only search collections carrying this tag
        #[arg(long)]
        file_tag: Option<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run a search test from a JSON request file ("-" reads stdin)
    Test {
        /// Request file in search test format
        request: PathBuf,
    },

    /// Import collections and chunks from a JSONL file
    Import {
        /// JSONL file, one collection per line
        file: PathBuf,
    },

    /// Show store statistics
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
