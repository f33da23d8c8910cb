//! CLI parse: clap types for Folio. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Folio CLI - Resumable long-form document generation
#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Generate long-form documents chapter by chapter from an outline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project id (defaults to the only project in the store)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a project from an outline TOML file
    Import {
        /// Path to the outline file
        outline: PathBuf,
    },
    /// List projects in the store
    Projects {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Start a fresh generation run
    Run {
        /// Stop for approval after each chapter
        #[arg(long)]
        checkpoint: bool,
        /// Echo each unit's text as it completes
        #[arg(long)]
        preview: bool,
    },
    /// Continue an interrupted or paused run
    Resume {
        /// Echo each unit's text as it completes
        #[arg(long)]
        preview: bool,
    },
    /// Approve the chapter held at a checkpoint and continue
    Approve,
    /// Discard a chapter's text and write it again
    Regenerate {
        /// Chapter number (1-based)
        chapter: u32,
    },
    /// Retry every failed and skipped unit
    RestartFailed,
    /// Clear run state and the recovery hint (chapters and text are kept)
    Reset,
    /// Show progress for the selected project
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Export the written text as Markdown
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}
