//! Command handlers for the `trellis` CLI.
//!
//! Each submodule exposes a `run` function taking the runtime context and
//! its parsed arguments.

pub mod completion;
pub mod inspect;
pub mod run_cmd;
pub mod validate;
pub mod version;
