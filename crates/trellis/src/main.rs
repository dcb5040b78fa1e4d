//! `trellis` -- form-logic engine CLI.
//!
//! Parses CLI arguments with clap, loads the engine configuration, and
//! dispatches to command handlers. Commands load a form definition from
//! disk, optionally replay an edit script against it, and report the
//! resulting document or validation state.

mod cli;
mod commands;
mod context;
mod output;
mod session;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use context::RuntimeContext;

fn dispatch(cli: Cli) -> Result<()> {
    let ctx = RuntimeContext::from_global_args(&cli.global)?;

    match cli.command {
        Some(Commands::Inspect(args)) => commands::inspect::run(&ctx, &args),
        Some(Commands::Run(args)) => commands::run_cmd::run(&ctx, &args),
        Some(Commands::Validate(args)) => commands::validate::run(&ctx, &args),
        Some(Commands::Completion(args)) => commands::completion::run(&ctx, &args),
        Some(Commands::Version) => commands::version::run(&ctx),
        None => {
            // No subcommand -- print help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let json = cli.global.json;

    // Diagnostics go to stderr so piped document output stays clean.
    if cli.global.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("trellis=debug,trellis_engine=debug,trellis_core=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = dispatch(cli) {
        if json {
            let err_json = serde_json::json!({
                "error": format!("{:#}", e),
            });
            if let Ok(s) = serde_json::to_string_pretty(&err_json) {
                eprintln!("{}", s);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
