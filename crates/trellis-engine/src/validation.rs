//! Required and constraint checking.
//!
//! Checks are deferred: edits enqueue a sequenced request, and a later
//! request for the same node supersedes an earlier one still in the queue.
//! Only the newest request per node actually evaluates.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;
use trellis_core::NodeRef;

use crate::form::Form;
use crate::registry::BindingKind;

/// What checking one node concluded. Required wins over constraint when
/// both could apply, and an empty value is never constraint-checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    #[default]
    Valid,
    InvalidRequired,
    InvalidConstraint,
}

impl ValidationOutcome {
    pub fn is_valid(self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::InvalidRequired => "invalid_required",
            ValidationOutcome::InvalidConstraint => "invalid_constraint",
        }
    }
}

impl std::fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Form {
    /// Queues `node` for checking. `force` bypasses the grace period that
    /// keeps freshly cloned repeat instances valid until first touched.
    pub(crate) fn schedule_validation(&mut self, node: &NodeRef, force: bool) {
        if !force && self.freshly_cloned.contains(node) {
            return;
        }
        if !self.has_validation(node) {
            return;
        }
        self.validation_seq += 1;
        self.validation_pending
            .insert(node.clone(), self.validation_seq);
        self.validation_tasks
            .push_back((self.validation_seq, node.clone()));
    }

    fn has_validation(&self, node: &NodeRef) -> bool {
        let path = node.path();
        self.registry.find(&path, BindingKind::Required).is_some()
            || self.registry.find(&path, BindingKind::Constraint).is_some()
    }

    /// Drains the queue, evaluating only the newest request per node.
    pub(crate) fn settle_validation(&mut self) {
        while let Some((seq, node)) = self.validation_tasks.pop_front() {
            if self.validation_pending.get(&node) != Some(&seq) {
                continue;
            }
            self.validation_pending.remove(&node);
            if !self.tree.contains(&node) {
                self.validation_state.remove(&node);
                continue;
            }
            let outcome = self.validate_node(&node);
            self.store_outcome(&node, outcome);
        }
    }

    pub(crate) fn store_outcome(&mut self, node: &NodeRef, outcome: ValidationOutcome) {
        let previous = self.validation_state.get(node).copied().unwrap_or_default();
        if previous == outcome {
            return;
        }
        if outcome.is_valid() {
            self.validation_state.remove(node);
        } else {
            self.validation_state.insert(node.clone(), outcome);
        }
        debug!(%node, ?outcome, "validation changed");
        self.view.validation_changed(node, outcome);
    }

    /// Evaluates the node's rules right now. Irrelevant nodes are always
    /// valid, whatever they hold.
    pub(crate) fn validate_node(&mut self, node: &NodeRef) -> ValidationOutcome {
        if self.effective_relevance(node).is_irrelevant() {
            return ValidationOutcome::Valid;
        }
        let path = node.path();
        let required = self
            .registry
            .find(&path, BindingKind::Required)
            .map(|b| (b.target.clone(), b.expr.clone()));
        let constraint = self
            .registry
            .find(&path, BindingKind::Constraint)
            .map(|b| (b.target.clone(), b.expr.clone()));
        let value = self.tree.value(node).unwrap_or_default().to_string();

        if let Some((target, expr)) = required {
            let is_required = match self.eval_bool(&expr, node) {
                Ok(answer) => answer,
                Err(err) => {
                    self.report_eval_issue(&target, &expr, err);
                    false
                }
            };
            if is_required && value.trim().is_empty() {
                return ValidationOutcome::InvalidRequired;
            }
        }
        if !value.is_empty() {
            if let Some((target, expr)) = constraint {
                match self.eval_bool(&expr, node) {
                    Ok(true) => {}
                    Ok(false) => return ValidationOutcome::InvalidConstraint,
                    Err(err) => self.report_eval_issue(&target, &expr, err),
                }
            }
        }
        ValidationOutcome::Valid
    }

    /// Checks every node that carries a required or constraint rule and
    /// returns the failures in rule declaration order.
    pub fn validate_all(&mut self) -> Vec<(NodeRef, ValidationOutcome)> {
        self.settle_validation();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for binding in self.registry.bindings() {
            if matches!(
                binding.kind,
                BindingKind::Required | BindingKind::Constraint
            ) && seen.insert(binding.target.clone())
            {
                targets.push(binding.target.clone());
            }
        }
        let mut failures = Vec::new();
        for target in targets {
            for node in self.tree.refs_of(&target) {
                let outcome = self.validate_node(&node);
                self.store_outcome(&node, outcome);
                if !outcome.is_valid() {
                    failures.push((node, outcome));
                }
            }
        }
        failures
    }
}
