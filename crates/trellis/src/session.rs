//! Loading definitions, records, and edit scripts from disk.
//!
//! The `run` and `validate` commands share this plumbing: everything a
//! session needs is read up front, then the script steps replay in order
//! against the form.

use std::fs;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;
use trellis_core::DocNode;
use trellis_engine::{Form, FormDefinition, NullView};
use trellis_expr::SimpleEvaluator;

use crate::context::RuntimeContext;

/// One step of an edit script.
///
/// Scripts are JSON arrays of tagged steps:
///
/// ```json
/// [
///   {"op": "set", "ref": "/d/name", "value": "Ada"},
///   {"op": "add", "series": "/d/child"},
///   {"op": "remove", "series": "/d/child", "ordinal": 1},
///   {"op": "sweep"}
/// ]
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Write a value to a node.
    Set {
        #[serde(rename = "ref")]
        reference: String,
        value: String,
    },
    /// Append a repeat instance, or insert at `at` (1-based).
    Add {
        series: String,
        #[serde(default)]
        at: Option<usize>,
    },
    /// Remove the `ordinal`-th instance of a series.
    Remove { series: String, ordinal: usize },
    /// Sweep values out of every irrelevant node.
    Sweep,
}

/// Reads and parses a form definition file.
pub fn load_definition(path: &str) -> Result<FormDefinition> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read form: {}", path))?;
    let definition = FormDefinition::from_json(&raw)
        .with_context(|| format!("invalid form definition: {}", path))?;
    debug!(form = %path, title = %definition.title, "loaded definition");
    Ok(definition)
}

/// Reads and parses a saved record document.
pub fn load_record(path: &str) -> Result<DocNode> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read record: {}", path))?;
    DocNode::from_json(&raw).with_context(|| format!("invalid record: {}", path))
}

/// Reads and parses an edit script file.
pub fn load_script(path: &str) -> Result<Vec<ScriptStep>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read script: {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid script: {}", path))
}

/// Initializes a form from a definition file plus an optional record file.
pub fn open_form(ctx: &RuntimeContext, form: &str, record: Option<&str>) -> Result<Form> {
    let definition = load_definition(form)?;
    let record = match record {
        Some(path) => Some(load_record(path)?),
        None => None,
    };
    let form = Form::init(
        &definition,
        record.as_ref(),
        ctx.config.clone(),
        Box::new(SimpleEvaluator::new()),
        Box::new(NullView),
    )
    .context("failed to initialize form")?;
    Ok(form)
}

/// Replays script steps against the form in order. A `set` on a readonly
/// target fails the step instead of being dropped.
pub fn apply_script(form: &mut Form, steps: &[ScriptStep]) -> Result<()> {
    for (i, step) in steps.iter().enumerate() {
        apply_step(form, step).with_context(|| format!("script step {} failed", i + 1))?;
    }
    Ok(())
}

fn apply_step(form: &mut Form, step: &ScriptStep) -> Result<()> {
    match step {
        ScriptStep::Set { reference, value } => {
            let node = form.resolve(reference)?;
            if form.is_readonly(&node) {
                bail!("{} is readonly", node);
            }
            form.set_value(&node, value)?;
        }
        ScriptStep::Add { series, at } => {
            let series = form.series_at(series)?;
            form.add_instance(&series, *at)?;
        }
        ScriptStep::Remove { series, ordinal } => {
            let series = form.series_at(series)?;
            form.remove_instance(&series, *ordinal)?;
        }
        ScriptStep::Sweep => form.clear_irrelevant(),
    }
    Ok(())
}
