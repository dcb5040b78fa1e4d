//! Clap CLI definitions for the `trellis` command.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// trellis -- reactive form-logic engine.
///
/// Loads a declarative form definition, replays edits against it, and
/// reports the resulting document, its option lists, and its validation
/// state.
#[derive(Parser, Debug)]
#[command(
    name = "trellis",
    about = "Reactive form-logic engine",
    long_about = "Loads a declarative form definition, replays edits against it, and reports the resulting document, its option lists, and its validation state.",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Global flags available to all subcommands.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Engine configuration file (TOML, layered under TRELLIS_* env vars).
    #[arg(long, global = true, env = "TRELLIS_CONFIG")]
    pub config: Option<String>,

    /// Output in JSON format.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose/debug output.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output (errors only).
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// All available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize a form definition: bindings, repeats, option lists,
    /// diagnostics.
    Inspect(InspectArgs),

    /// Replay an edit script against a form and print the document.
    Run(RunArgs),

    /// Settle every check on a form and report failures (exit 1 if any).
    Validate(ValidateArgs),

    /// Generate shell completions.
    Completion(CompletionArgs),

    /// Print version and platform information.
    Version,
}

/// Arguments for `trellis inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to the form definition JSON file.
    pub form: String,
}

/// Arguments for `trellis run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the form definition JSON file.
    pub form: String,

    /// Saved record to load into the form before edits.
    #[arg(long)]
    pub record: Option<String>,

    /// Edit script to replay (JSON array of steps).
    #[arg(short = 's', long)]
    pub script: Option<String>,

    /// Drop irrelevant nodes from the printed document.
    #[arg(long)]
    pub omit_irrelevant: bool,
}

/// Arguments for `trellis validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the form definition JSON file.
    pub form: String,

    /// Saved record to load into the form before checking.
    #[arg(long)]
    pub record: Option<String>,

    /// Edit script to replay before checking.
    #[arg(short = 's', long)]
    pub script: Option<String>,
}

/// Arguments for `trellis completion`.
#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// Shell to generate the completion script for.
    #[arg(value_enum)]
    pub shell: Shell,
}
