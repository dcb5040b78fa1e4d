//! Expression evaluation for the trellis form engine.
//!
//! The engine never interprets expressions itself; it talks to an
//! [`Evaluator`] behind a trait object. This crate defines that port (trait,
//! context, value model) and ships [`SimpleEvaluator`], a small
//! XPath-flavoured implementation that covers the constructs survey forms
//! actually use, so tests and the CLI can run real form definitions.

pub mod engine;
pub mod parser;
pub mod types;

// Re-exports for convenience.
pub use engine::SimpleEvaluator;
pub use types::{Choice, EvalContext, EvalError, Evaluator, ModelView, Result, Value};
