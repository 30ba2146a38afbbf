//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for commands that print results.
#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Table,
    /// JSON (same as --json)
    Json,
}

pub mod commands;

/// Atlas Search - find visually similar cases in a labeled reference atlas
#[derive(Parser, Debug)]
#[command(name = "atlas", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.atlas/data/atlas.db)
    #[arg(long, global = true, env = "ATLAS_DB")]
    pub db: Option<PathBuf>,

    /// Collection name (default: pathology_cases)
    #[arg(long, global = true, env = "ATLAS_COLLECTION")]
    pub collection: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Output format (table, json)
    #[arg(long, value_enum, global = true, default_value_t)]
    pub format: OutputFormat,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed every image of an atlas directory into the collection
    ///
    /// The atlas root holds one sub-directory per category (diagnosis).
    /// When the collection already has entries, pass --replace or --extend.
    Build {
        /// Atlas root directory
        atlas_dir: PathBuf,

        /// Drop existing entries before indexing
        #[arg(long, conflicts_with = "extend")]
        replace: bool,

        /// Keep existing entries and upsert on top of them
        #[arg(long)]
        extend: bool,

        /// Images embedded per extractor call
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Provenance tag stored on every entry
        #[arg(long)]
        source: Option<String>,

        /// Skip files whose content hash is already indexed (extend only)
        #[arg(long)]
        skip_unchanged: bool,
    },

    /// Find the atlas entries most similar to a probe image
    ///
    /// PROBE is an http(s) URL, a local file path, or a base64 payload
    /// (with or without a data: URI prefix).
    Search {
        /// Probe image
        probe: String,

        /// Number of matches (clamped to 1..=20)
        #[arg(short = 'k', long, default_value_t = 5, allow_negative_numbers = true)]
        top_k: i64,
    },

    /// Find the atlas entries most similar to an image file
    SearchFile {
        /// Image file path
        path: PathBuf,

        /// Number of matches (clamped to 1..=20)
        #[arg(short = 'k', long, default_value_t = 5, allow_negative_numbers = true)]
        top_k: i64,
    },

    /// Show collection size, dimension and category breakdown
    Status,

    /// Remove the collection and all of its entries
    Drop {
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },

    /// Serve queries over HTTP
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:18930", env = "ATLAS_ADDR")]
        addr: String,

        /// Request handler threads
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Skip loading the extractor at startup
        #[arg(long)]
        no_warmup: bool,
    },

    /// Manage the embedding provider
    Embeddings {
        #[command(subcommand)]
        command: EmbeddingsCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Embeddings Commands
// ============================================================================

#[derive(Subcommand, Debug, Clone)]
pub enum EmbeddingsCommands {
    /// Show embeddings status and configuration
    Status,

    /// Configure embedding provider
    Configure {
        /// Provider (http, huggingface)
        #[arg(short, long)]
        provider: Option<String>,

        /// Enable embeddings
        #[arg(long)]
        enable: bool,

        /// Disable embeddings
        #[arg(long)]
        disable: bool,

        /// Model to use (provider-specific)
        #[arg(short, long)]
        model: Option<String>,

        /// API endpoint (for custom servers)
        #[arg(long)]
        endpoint: Option<String>,

        /// API token (HuggingFace token or embedding server key)
        #[arg(long)]
        token: Option<String>,

        /// Forget every stored embedding setting
        #[arg(long, conflicts_with_all = ["provider", "enable", "disable", "model", "endpoint", "token"])]
        reset: bool,
    },

    /// Embed one image and print a sample of the vector
    Test {
        /// Image file to embed
        image: PathBuf,
    },
}
