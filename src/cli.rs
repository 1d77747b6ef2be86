use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    InitConfig {
        path: PathBuf,
    },

    #[command(flatten)]
    App(AppCommand),
}

/// Subcommands that run against an opened data directory
#[derive(Subcommand)]
pub enum AppCommand {
    /// Run the queue worker until interrupted
    Worker,

    /// Start a batch translation of every text file in a container
    Start {
        /// Container holding the source files
        #[arg(short, long)]
        source: String,

        /// Container receiving nmt/ and llm/ outputs
        #[arg(short, long)]
        target: String,

        /// Target language code
        #[arg(short = 'l', long)]
        target_lang: String,

        /// Source language code (auto-detected when omitted)
        #[arg(long)]
        source_lang: Option<String>,

        /// Only translate blobs whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Dictionary entry as term=translation (repeatable)
        #[arg(short, long = "dictionary", value_name = "TERM=TRANSLATION")]
        dictionary: Vec<String>,

        /// JSON file with a {"term": "translation"} object
        #[arg(long)]
        dictionary_file: Option<PathBuf>,

        /// Translate inline instead of enqueuing work items
        #[arg(long)]
        sync: bool,
    },

    /// Show the status of a job
    Status {
        job_id: String,
    },

    /// List jobs, newest first
    Jobs {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Delete a job record
    DeleteJob {
        job_id: String,
    },

    /// Remove finished jobs older than the given age
    Cleanup {
        /// Age in hours (defaults to jobs.cleanup_max_age_hours)
        #[arg(long)]
        hours: Option<u64>,
    },

    /// List containers in the object store
    Containers,

    /// List text files in a container
    Files {
        container: String,
    },

    /// List matched nmt/ and llm/ output pairs in a container
    Translations {
        container: String,
    },

    /// Print both translations of one file
    Show {
        container: String,
        filename: String,
    },

    /// Print source text and both translations for every matched file as JSON
    Evaluate {
        source: String,
        target: String,
    },

    /// Record which translation of a file reads better
    Rate {
        /// Container holding the nmt/ and llm/ outputs
        container: String,

        /// File name without the nmt/ or llm/ prefix
        filename: String,

        /// Preferred translation: nmt or llm
        #[arg(short, long)]
        preferred: String,

        /// Free-form reviewer comments
        #[arg(long)]
        comments: Option<String>,
    },

    /// List submitted ratings
    Ratings,

    /// Show how often each translation was preferred
    RatingStats,

    /// Show the approximate number of queued work items
    QueueLength,
}
