//! Relevance propagation. A node's presented state folds in its ancestors:
//! any irrelevant ancestor dominates whatever the node itself computed.

use tracing::debug;
use trellis_core::{NodeRef, Relevance};

use crate::form::Form;
use crate::registry::{BindingId, BindingKind};
use crate::validation::ValidationOutcome;

impl Form {
    /// The relevance a node presents: irrelevant if any ancestor is,
    /// otherwise its own stored state.
    pub(crate) fn effective_relevance(&self, node: &NodeRef) -> Relevance {
        if self.ancestor_irrelevant(node) {
            return Relevance::Irrelevant;
        }
        self.tree.relevance(node).unwrap_or_default()
    }

    fn ancestor_irrelevant(&self, node: &NodeRef) -> bool {
        let mut cursor = node.parent();
        while let Some(ancestor) = cursor {
            if self.tree.relevance(&ancestor) == Some(Relevance::Irrelevant) {
                return true;
            }
            cursor = ancestor.parent();
        }
        false
    }

    pub(crate) fn refresh_branch(&mut self, id: BindingId, origin: &NodeRef) {
        let target = self.registry.binding(id).target.clone();
        for node in self.scoped_targets(&target, origin) {
            self.apply_branch_instance(id, &node);
        }
    }

    pub(crate) fn apply_branch_instance(&mut self, id: BindingId, node: &NodeRef) {
        // An irrelevant ancestor hides the whole subtree, so the condition
        // is not evaluated at all. It re-runs when the ancestor reveals it.
        if self.ancestor_irrelevant(node) {
            return;
        }
        if !self.guard_binding(id, node) {
            return;
        }
        let binding = self.registry.binding(id);
        let (target, expr) = (binding.target.clone(), binding.expr.clone());
        let verdict = match self.eval_bool(&expr, node) {
            Ok(true) => Relevance::Relevant,
            Ok(false) => Relevance::Irrelevant,
            Err(err) => {
                self.report_eval_issue(&target, &expr, err);
                Relevance::Relevant
            }
        };
        self.apply_relevance(node, verdict);
    }

    pub(crate) fn apply_relevance(&mut self, node: &NodeRef, verdict: Relevance) {
        let previous = self.tree.relevance(node).unwrap_or_default();
        if previous == verdict || self.tree.set_relevance(node, verdict).is_err() {
            return;
        }
        debug!(%node, ?verdict, "relevance changed");
        self.view.relevance_changed(node, verdict);
        match verdict {
            Relevance::Irrelevant => {
                self.reset_validation_under(node);
                // Values survive the first pass after load; only states
                // flipped by a live edit clear.
                if !previous.is_pre_init()
                    && !self.initializing
                    && self.config.clear_irrelevant_immediately
                {
                    self.clear_subtree_values(node);
                }
            }
            Relevance::Relevant => self.reveal_subtree(node),
            Relevance::PreInit => {}
        }
    }

    fn clear_subtree_values(&mut self, node: &NodeRef) {
        for nref in self.tree.subtree_refs(node) {
            if self.tree.value(&nref).is_some_and(|v| !v.is_empty()) {
                self.write_value(&nref, "");
            }
        }
    }

    /// Re-runs everything under a subtree that just became visible again.
    /// Top-down order lets nested conditions re-establish their own
    /// dominance before deeper nodes are considered.
    fn reveal_subtree(&mut self, node: &NodeRef) {
        for nref in self.tree.subtree_refs(node) {
            let ids = self.id_list_for(&nref);
            for id in ids {
                match self.registry.binding(id).kind {
                    BindingKind::Relevant if nref != *node => {
                        self.apply_branch_instance(id, &nref);
                    }
                    BindingKind::Calculate => self.run_calc_instance(id, &nref),
                    BindingKind::Itemset => self.refresh_itemset_instance(id, &nref),
                    _ => {}
                }
            }
        }
    }

    fn id_list_for(&self, node: &NodeRef) -> Vec<BindingId> {
        self.registry.of_target(&node.path()).to_vec()
    }

    fn reset_validation_under(&mut self, node: &NodeRef) {
        let stale: Vec<NodeRef> = self
            .validation_state
            .keys()
            .filter(|n| n.starts_with(node))
            .cloned()
            .collect();
        for nref in stale {
            self.store_outcome(&nref, ValidationOutcome::Valid);
        }
    }
}
