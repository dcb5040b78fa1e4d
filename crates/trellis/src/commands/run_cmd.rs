//! `trellis run` -- replay an edit script and print the document.
//!
//! The document lands on stdout so it can be piped; diagnostics go to
//! stderr.

use anyhow::Result;
use trellis_core::SerializeOptions;

use crate::cli::RunArgs;
use crate::context::RuntimeContext;
use crate::output::{output_json, render_warn};
use crate::session;

/// Execute the `trellis run` command.
pub fn run(ctx: &RuntimeContext, args: &RunArgs) -> Result<()> {
    let mut form = session::open_form(ctx, &args.form, args.record.as_deref())?;

    if let Some(script) = &args.script {
        let steps = session::load_script(script)?;
        session::apply_script(&mut form, &steps)?;
    }

    let include_irrelevant = !args.omit_irrelevant;

    if ctx.json {
        let report = serde_json::json!({
            "document": form.to_doc(include_irrelevant),
            "edited": form.edited(),
            "diagnostics": form
                .diagnostics()
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>(),
        });
        output_json(&report);
        return Ok(());
    }

    println!(
        "{}",
        form.serialize(SerializeOptions { include_irrelevant })?
    );

    if !ctx.quiet {
        for issue in form.diagnostics() {
            eprintln!("{}", render_warn(&format!("warning: {}", issue)));
        }
    }

    Ok(())
}
