use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docstore::DuplicatePolicy;

#[derive(Debug, Parser)]
#[command(
    name = "docstore",
    about = "An embedded document store with BM25 keyword search"
)]
pub struct Cli {
    /// Path to the store file (defaults to $DOCSTORE_PATH or the XDG data
    /// directory)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Load store settings from a JSON file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Add documents from a JSON-lines file (or stdin)
    Add(AddArgs),
    /// Run a keyword query
    Query(QueryArgs),
    /// Print documents by id
    Get(GetArgs),
    /// Delete documents by id or by filter
    Delete(DeleteArgs),
    /// Count documents
    Count(CountArgs),
    /// Show store location and index statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// JSON-lines file with one `{"id", "index", "content", "metadata"}`
    /// object per line; reads stdin when omitted or `-`
    pub input: Option<PathBuf>,

    /// Index for documents that do not name one
    #[arg(short = 'i', long)]
    pub index: Option<String>,

    /// What to do with ids that already exist: overwrite, skip or fail
    #[arg(long, value_parser = parse_policy)]
    pub on_duplicate: Option<DuplicatePolicy>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_policy(s: &str) -> Result<DuplicatePolicy, String> {
    s.parse().map_err(|e: docstore::Error| e.to_string())
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// Query text (may be empty for a filter-only query)
    #[arg(default_value = "")]
    pub text: String,

    /// Restrict to one index
    #[arg(short = 'i', long)]
    pub index: Option<String>,

    /// Metadata filter as JSON, e.g. '{"year": {"$gte": 2020}}'
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Number of results to return
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Return every match
    #[arg(long, conflicts_with = "count")]
    pub all: bool,

    /// Only return documents containing every query term
    #[arg(long)]
    pub all_terms: bool,

    /// Scale scores into (0, 1)
    #[arg(long)]
    pub scale: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Document ids
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

// -- Delete --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Document ids
    #[arg(required_unless_present_any = ["index", "filter"])]
    pub ids: Vec<String>,

    /// Delete every document in this index
    #[arg(short = 'i', long, conflicts_with = "ids")]
    pub index: Option<String>,

    /// Delete every document matching this JSON filter
    #[arg(short = 'f', long, conflicts_with = "ids")]
    pub filter: Option<String>,
}

// -- Count --

#[derive(Debug, Parser)]
pub struct CountArgs {
    /// Restrict to one index
    #[arg(short = 'i', long)]
    pub index: Option<String>,

    /// Metadata filter as JSON
    #[arg(short = 'f', long)]
    pub filter: Option<String>,
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
            "docstore",
            &mut std::io::stdout(),
        );
    }
}
