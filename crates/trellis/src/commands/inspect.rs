//! `trellis inspect` -- summarize a form definition.
//!
//! Loads the definition and initializes a scratch form so structural
//! problems (cycles, dangling references) surface as diagnostics alongside
//! the declared bindings, repeats, and option lists.

use anyhow::Result;
use trellis_core::DocNode;
use trellis_engine::{BindingDecl, Form, NullView};
use trellis_expr::SimpleEvaluator;

use crate::cli::InspectArgs;
use crate::context::RuntimeContext;
use crate::output::{
    ICON_FAIL, ICON_PASS, ICON_WARN, output_json, output_table, render_fail, render_pass,
    render_warn,
};
use crate::session;

/// Execute the `trellis inspect` command.
pub fn run(ctx: &RuntimeContext, args: &InspectArgs) -> Result<()> {
    let definition = session::load_definition(&args.form)?;
    let form = Form::init(
        &definition,
        None,
        ctx.config.clone(),
        Box::new(SimpleEvaluator::new()),
        Box::new(NullView),
    )?;

    let nodes = count_nodes(&definition.instance);
    let diagnostics: Vec<String> = form.diagnostics().iter().map(|i| i.to_string()).collect();

    if ctx.json {
        let report = serde_json::json!({
            "title": definition.title,
            "root": definition.instance.name,
            "nodes": nodes,
            "bindings": definition
                .bindings
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "nodeset": b.nodeset,
                        "rules": binding_rules(b),
                    })
                })
                .collect::<Vec<_>>(),
            "repeats": definition
                .repeats
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "nodeset": r.nodeset,
                        "count": r.count,
                        "minimal": r.minimal,
                    })
                })
                .collect::<Vec<_>>(),
            "selects": definition
                .selects
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "nodeset": s.nodeset,
                        "itemset": s.itemset,
                        "multiple": s.multiple,
                    })
                })
                .collect::<Vec<_>>(),
            "choice_lists": definition.choices.len(),
            "diagnostics": diagnostics,
        });
        output_json(&report);
        return Ok(());
    }

    let title = if definition.title.is_empty() {
        definition.instance.name.as_str()
    } else {
        definition.title.as_str()
    };
    println!("{}", title);
    println!(
        "Root: /{} ({} nodes, {} bindings, {} choice lists)",
        definition.instance.name,
        nodes,
        definition.bindings.len(),
        definition.choices.len(),
    );

    if !definition.bindings.is_empty() {
        println!();
        println!("BINDINGS");
        let rows: Vec<Vec<String>> = definition
            .bindings
            .iter()
            .map(|b| vec![b.nodeset.clone(), binding_rules(b).join(", ")])
            .collect();
        output_table(&["NODESET", "RULES"], &rows);
    }

    if !definition.repeats.is_empty() {
        println!();
        println!("REPEATS");
        let rows: Vec<Vec<String>> = definition
            .repeats
            .iter()
            .map(|r| {
                let count = match &r.count {
                    Some(expr) => expr.clone(),
                    None if r.minimal => "manual (starts empty)".to_string(),
                    None => "manual".to_string(),
                };
                vec![r.nodeset.clone(), count]
            })
            .collect();
        output_table(&["NODESET", "COUNT"], &rows);
    }

    if !definition.selects.is_empty() {
        println!();
        println!("SELECTS");
        let rows: Vec<Vec<String>> = definition
            .selects
            .iter()
            .map(|s| {
                let mode = if s.multiple { "multiple" } else { "single" };
                vec![s.nodeset.clone(), mode.to_string(), s.itemset.clone()]
            })
            .collect();
        output_table(&["NODESET", "MODE", "ITEMSET"], &rows);
    }

    println!();
    if form.diagnostics().is_empty() {
        if !ctx.quiet {
            println!("{} no diagnostics", render_pass(ICON_PASS));
        }
    } else {
        println!("DIAGNOSTICS");
        for issue in form.diagnostics() {
            if issue.is_cycle() {
                println!("  {} {}", render_fail(ICON_FAIL), issue);
            } else {
                println!("  {} {}", render_warn(ICON_WARN), issue);
            }
        }
    }

    Ok(())
}

/// Names the rule kinds a binding declares, in a stable order.
fn binding_rules(binding: &BindingDecl) -> Vec<&'static str> {
    let mut rules = Vec::new();
    if binding.calculate.is_some() {
        rules.push("calculate");
    }
    if binding.relevant.is_some() {
        rules.push("relevant");
    }
    if binding.required.is_some() {
        rules.push("required");
    }
    if binding.constraint.is_some() {
        rules.push("constraint");
    }
    if binding.default.is_some() {
        rules.push("default");
    }
    if binding.readonly {
        rules.push("readonly");
    }
    rules
}

fn count_nodes(doc: &DocNode) -> usize {
    1 + doc.children.iter().map(count_nodes).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- summaries ----

    #[test]
    fn binding_rules_in_stable_order() {
        let binding: BindingDecl = serde_json::from_str(
            r#"{"nodeset": "/d/a", "calculate": "1", "constraint": ". > 0", "readonly": true}"#,
        )
        .unwrap();
        assert_eq!(
            binding_rules(&binding),
            vec!["calculate", "constraint", "readonly"]
        );
    }

    #[test]
    fn node_count_walks_the_tree() {
        let doc = DocNode::branch(
            "d",
            vec![
                DocNode::leaf("a", "1"),
                DocNode::branch("grp", vec![DocNode::leaf("b", "")]),
            ],
        );
        assert_eq!(count_nodes(&doc), 4);
    }
}
