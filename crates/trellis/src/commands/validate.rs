//! `trellis validate` -- settle every check and report failures.
//!
//! Exits with code 1 when any field fails, so scripts can gate on it.

use anyhow::Result;

use crate::cli::ValidateArgs;
use crate::context::RuntimeContext;
use crate::output::{ICON_FAIL, ICON_PASS, output_json, render_fail, render_pass};
use crate::session;

/// Execute the `trellis validate` command.
pub fn run(ctx: &RuntimeContext, args: &ValidateArgs) -> Result<()> {
    let mut form = session::open_form(ctx, &args.form, args.record.as_deref())?;

    if let Some(script) = &args.script {
        let steps = session::load_script(script)?;
        session::apply_script(&mut form, &steps)?;
    }

    let failures = form.validate_all();

    if ctx.json {
        let report = serde_json::json!({
            "valid": failures.is_empty(),
            "failures": failures
                .iter()
                .map(|(node, outcome)| {
                    serde_json::json!({
                        "node": node.to_string(),
                        "outcome": outcome.as_str(),
                    })
                })
                .collect::<Vec<_>>(),
        });
        output_json(&report);
    } else if failures.is_empty() {
        println!("{} document is valid", render_pass(ICON_PASS));
    } else {
        for (node, outcome) in &failures {
            println!("{} {}: {}", render_fail(ICON_FAIL), node, outcome);
        }
        if !ctx.quiet {
            println!();
            println!("{} field(s) failed validation", failures.len());
        }
    }

    if !failures.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
