//! Expression-driven option lists, and what happens to an existing answer
//! when its list changes underneath it.

use tracing::debug;
use trellis_core::NodeRef;
use trellis_expr::{Choice, Value};

use crate::form::Form;
use crate::registry::BindingId;

impl Form {
    pub(crate) fn refresh_itemset(&mut self, id: BindingId, origin: &NodeRef) {
        let target = self.registry.binding(id).target.clone();
        for node in self.scoped_targets(&target, origin) {
            self.refresh_itemset_instance(id, &node);
        }
    }

    pub(crate) fn refresh_itemset_instance(&mut self, id: BindingId, node: &NodeRef) {
        if self.effective_relevance(node).is_irrelevant() {
            return;
        }
        if !self.guard_binding(id, node) {
            return;
        }
        let binding = self.registry.binding(id);
        let (target, expr) = (binding.target.clone(), binding.expr.clone());
        let options = match self.evaluate(&expr, node) {
            Ok(Value::Items(options)) => options,
            Ok(Value::Empty) => Vec::new(),
            Ok(_) => {
                let reason = "itemset expression must yield an option list";
                self.report_eval_issue(&target, &expr, reason);
                return;
            }
            // The previous list stays in force when the expression fails.
            Err(err) => {
                self.report_eval_issue(&target, &expr, err);
                return;
            }
        };
        if self.itemset_state.get(node) == Some(&options) {
            return;
        }
        debug!(%node, options = options.len(), "itemset updated");
        self.view.itemset_updated(node, &options);
        self.reconcile_selection(node, &options);
        self.itemset_state.insert(node.clone(), options);
    }

    /// Keeps only the selected tokens that survive in the new list, in the
    /// order they were chosen. Nothing is ever selected on the user's
    /// behalf.
    fn reconcile_selection(&mut self, node: &NodeRef, options: &[Choice]) {
        let Some(current) = self.tree.value(node).map(|v| v.to_string()) else {
            return;
        };
        if current.is_empty() {
            return;
        }
        let keep = |token: &str| options.iter().any(|c| c.value == token);
        let reconciled = if self.multi_selects.contains(&node.path()) {
            current
                .split_whitespace()
                .filter(|t| keep(t))
                .collect::<Vec<_>>()
                .join(" ")
        } else if keep(&current) {
            current.clone()
        } else {
            String::new()
        };
        if reconciled != current {
            self.write_value(node, &reconciled);
        }
    }
}
