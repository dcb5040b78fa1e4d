//! Runtime context for command execution.
//!
//! The [`RuntimeContext`] holds the state every command handler needs:
//! the resolved engine configuration and the global output flags.

use std::path::Path;

use anyhow::{Context, Result};
use trellis_config::EngineConfig;

use crate::cli::GlobalArgs;

/// Runtime context passed to every command handler.
///
/// Constructed once in `main` after CLI parsing, before command dispatch.
#[derive(Debug)]
pub struct RuntimeContext {
    /// Engine configuration, layered from the optional `--config` file and
    /// `TRELLIS_*` environment overrides.
    pub config: EngineConfig,

    /// Whether to produce JSON output.
    pub json: bool,

    /// Verbose output.
    pub verbose: bool,

    /// Quiet mode: suppress non-essential output.
    pub quiet: bool,
}

impl RuntimeContext {
    /// Builds a `RuntimeContext` from parsed global arguments.
    pub fn from_global_args(global: &GlobalArgs) -> Result<Self> {
        let config = trellis_config::load_config(global.config.as_deref().map(Path::new))
            .context("invalid engine configuration")?;

        Ok(Self {
            config,
            json: global.json,
            verbose: global.verbose,
            quiet: global.quiet,
        })
    }
}
