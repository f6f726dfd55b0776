use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "dentlink",
    about = "Normalize, tokenize and entity-link dental clinical notes"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Normalize and tokenize note lines (no linking)
    Normalize(NormalizeArgs),
    /// Run the full annotation pipeline over note lines
    Link(LinkArgs),
    /// Manage the concept vector store
    Vectors {
        #[command(subcommand)]
        action: VectorsAction,
    },
    /// Show data directory contents and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Normalize --

#[derive(Debug, Parser)]
pub struct NormalizeArgs {
    /// Input file with one note per line, or `-` for stdin
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Write JSONL records here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

// -- Link --

#[derive(Debug, Parser)]
pub struct LinkArgs {
    /// Input file with one note per line, or `-` for stdin
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Write JSONL records here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip the vector store even when one is built
    #[arg(long)]
    pub no_vectors: bool,

    /// Replay recorded refine responses (JSONL, one per input line)
    #[arg(long)]
    pub refine_responses: Option<PathBuf>,

    /// Merge adjacent same-concept mentions and prune weak vector-only ones
    #[arg(long)]
    pub bundle: bool,
}

// -- Vectors --

#[derive(Debug, Subcommand)]
pub enum VectorsAction {
    /// Embed every lexicon label and synonym into the vector store
    Build,
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
            "dentlink",
            &mut std::io::stdout(),
        );
    }
}
