//! Bridges the instance tree into the expression engine's model trait.

use std::collections::HashMap;

use trellis_core::{InstanceTree, NodeRef, RefPattern};
use trellis_expr::{Choice, EvalContext, ModelView, Value};

use crate::form::Form;

/// A read-only window over the live tree plus the static choice lists.
/// Built fresh per evaluation so expressions always see current state.
pub(crate) struct TreeWindow<'a> {
    pub(crate) tree: &'a InstanceTree,
    pub(crate) choices: &'a HashMap<String, Vec<Choice>>,
}

impl ModelView for TreeWindow<'_> {
    fn value_of(&self, reference: &str, context: &NodeRef) -> trellis_expr::Result<Option<String>> {
        let pattern = RefPattern::resolve(reference, context)?;
        Ok(self
            .tree
            .resolve_pattern(&pattern)
            .into_iter()
            .next()
            .and_then(|node| self.tree.value(&node).map(|v| v.to_string())))
    }

    fn values_of(&self, reference: &str, context: &NodeRef) -> trellis_expr::Result<Vec<String>> {
        let pattern = RefPattern::resolve(reference, context)?;
        Ok(self
            .tree
            .resolve_pattern(&pattern)
            .into_iter()
            .filter_map(|node| self.tree.value(&node).map(|v| v.to_string()))
            .collect())
    }

    fn count_of(&self, reference: &str, context: &NodeRef) -> trellis_expr::Result<usize> {
        let pattern = RefPattern::resolve(reference, context)?;
        Ok(self.tree.resolve_pattern(&pattern).len())
    }

    fn resolve_first(
        &self,
        reference: &str,
        context: &NodeRef,
    ) -> trellis_expr::Result<Option<NodeRef>> {
        let pattern = RefPattern::resolve(reference, context)?;
        Ok(self.tree.resolve_pattern(&pattern).into_iter().next())
    }

    fn choice_list(&self, name: &str) -> Option<&[Choice]> {
        self.choices.get(name).map(Vec::as_slice)
    }
}

impl Form {
    /// Evaluates an expression with `context` as the anchor for relative
    /// references.
    pub(crate) fn evaluate(&self, expr: &str, context: &NodeRef) -> trellis_expr::Result<Value> {
        let window = TreeWindow {
            tree: &self.tree,
            choices: &self.choices,
        };
        self.evaluator.evaluate(expr, &EvalContext::new(context, &window))
    }

    pub(crate) fn eval_bool(&self, expr: &str, context: &NodeRef) -> trellis_expr::Result<bool> {
        self.evaluate(expr, context).map(|v| v.as_bool())
    }
}
