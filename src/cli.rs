use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "notebert",
    version,
    about = "Semantic indexing and related-note search for a folder of markdown notes"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model path
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Rebuild the vector index from every note under the notes root
    Index(IndexArgs),
    /// Find notes related to a query
    Search(SearchArgs),
    /// Index the notes root, then keep the index in sync with changes
    Watch,
    /// Show index and configuration status
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print every stored setting
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the directory holding the notes
    SetRoot {
        /// Path to the notes directory
        path: PathBuf,
    },
    /// Set the embedding model path
    SetModel {
        /// Local model directory or model id
        path: PathBuf,
    },
    /// Set a tuning value (chunk_size, chunk_overlap, similarity_ceiling,
    /// overfetch_factor)
    Set { key: String, value: String },
    /// Remove a stored setting
    Unset { key: String },
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The query text
    pub query: String,

    /// Number of notes to return (defaults to the configured limit)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Note id to leave out of the results, usually the note being viewed
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "notebert",
            &mut std::io::stdout(),
        );
    }
}
