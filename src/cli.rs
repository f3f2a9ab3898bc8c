use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PageMode {
    /// Whole files packed under the token budget
    Files,
    /// Whole files when they fit, chunk pages when they do not
    Mixed,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split one file into token-bounded chunks
    Chunk {
        /// File to chunk
        file: PathBuf,

        /// Chunking strategy
        #[arg(short, long, default_value = "smart", value_parser = ["smart", "lines", "functions", "classes", "sections", "tokens"])]
        strategy: String,

        /// Token budget per chunk (defaults to the model's chunk size)
        #[arg(long = "max-tokens")]
        max_tokens: Option<usize>,

        /// Lines repeated from the previous chunk
        #[arg(long)]
        overlap: Option<usize>,

        /// Print chunk bodies, not only their positions
        #[arg(long = "show-content")]
        show_content: bool,
    },

    /// Print one page of a directory and the cursor for the next
    Paginate {
        /// Directory to page through
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Pagination mode
        #[arg(short, long, value_enum, default_value = "files")]
        mode: PageMode,

        /// Token budget per page
        #[arg(long = "max-tokens")]
        max_tokens: Option<usize>,

        /// Maximum files per page
        #[arg(long = "page-size")]
        page_size: Option<usize>,

        /// Cursor printed by the previous invocation
        #[arg(short, long)]
        cursor: Option<String>,

        /// Output format
        #[arg(short = 'o', long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Analyze every file under a directory concurrently
    Analyze {
        /// Directory to analyze
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Files per batch
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,

        /// Maximum files analyzed at once
        #[arg(long = "max-concurrent")]
        max_concurrent: Option<usize>,

        /// Extra content analyzers to run, by kind
        #[arg(short, long)]
        kind: Vec<String>,

        /// Output format
        #[arg(short = 'o', long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the directory analysis as a background task and wait for it
    Job {
        /// Directory to analyze
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Files per batch
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,

        /// Seconds to wait for the task before giving up
        #[arg(long, default_value = "300")]
        wait: u64,
    },

    /// Print the effective configuration
    Config,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Token-aware chunking, pagination and concurrent analysis of source trees", long_about = None)]
pub struct Args {
    /// Log level (overrides configuration; RUST_LOG takes precedence)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
