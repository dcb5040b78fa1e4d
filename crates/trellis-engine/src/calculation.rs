//! Calculated values. Writes land on the tree through the usual event
//! buffer, so downstream readers pick them up on the next pump cycle.

use tracing::debug;
use trellis_core::NodeRef;

use crate::form::Form;
use crate::registry::BindingId;

impl Form {
    /// Runs a batch of calculations in topological order so producers
    /// within the batch settle before their consumers.
    pub(crate) fn run_calculations(&mut self, mut ids: Vec<BindingId>, origin: &NodeRef) {
        ids.sort_by_key(|id| self.registry.calc_rank(*id));
        for id in ids {
            let target = self.registry.binding(id).target.clone();
            for node in self.scoped_targets(&target, origin) {
                self.run_calc_instance(id, &node);
            }
        }
    }

    pub(crate) fn run_calc_instance(&mut self, id: BindingId, node: &NodeRef) {
        if self.effective_relevance(node).is_irrelevant() {
            return;
        }
        if !self.guard_binding(id, node) {
            return;
        }
        let binding = self.registry.binding(id);
        let (target, expr) = (binding.target.clone(), binding.expr.clone());
        match self.evaluate(&expr, node) {
            Ok(value) => {
                let text = value.to_text();
                debug!(%node, %text, "calculated");
                self.write_value(node, &text);
            }
            Err(err) => self.report_eval_issue(&target, &expr, err),
        }
    }
}
