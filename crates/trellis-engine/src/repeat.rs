//! Repeat series management: dynamic counts, template cloning, and the
//! per-instance bookkeeping that structural edits invalidate.

use tracing::debug;
use trellis_core::{ModelError, NodeRef, Path, SeriesRef};
use trellis_expr::Value;

use crate::form::{Form, RepeatMeta};
use crate::registry::{BindingId, BindingKind};
use crate::validation::ValidationOutcome;

/// True when `nref` lies on or under an instance of `series`.
fn in_series(nref: &NodeRef, series: &SeriesRef) -> bool {
    let parent_depth = series.parent.depth();
    nref.depth() > parent_depth
        && nref.starts_with(&series.parent)
        && nref.steps()[parent_depth].name == series.name
}

/// Count expressions yield whatever authors wrote; anything that is not a
/// non-negative number means zero instances.
pub(crate) fn clamp_count(value: &Value) -> usize {
    value
        .as_number()
        .map_or(0, |n| if n.is_nan() || n < 0.0 { 0 } else { n as usize })
}

impl Form {
    /// Re-evaluates a count expression and grows or shrinks each affected
    /// series to match. Evaluation failures keep the current cardinality.
    pub(crate) fn reconcile_count(&mut self, id: BindingId, origin: &NodeRef) {
        let binding = self.registry.binding(id);
        let (series_path, expr) = (binding.target.clone(), binding.expr.clone());
        let Some(parent_path) = series_path.parent() else {
            return;
        };
        let name = series_path.leaf().to_string();
        let parents: Vec<NodeRef> = self
            .tree
            .refs_of(&parent_path)
            .into_iter()
            .filter(|p| p.same_scope(origin))
            .collect();
        for parent in parents {
            if !self.guard_binding(id, &parent) {
                continue;
            }
            let series = SeriesRef::new(parent, name.clone());
            // Counts are authored relative to the repeat node. Anchoring at
            // the first instance is purely syntactic, so it works even
            // while the series is empty.
            let context = series.instance(1);
            let desired = match self.evaluate(&expr, &context) {
                Ok(value) => clamp_count(&value),
                Err(err) => {
                    self.report_eval_issue(&series_path, &expr, err);
                    continue;
                }
            };
            self.resize_series(&series, desired);
        }
    }

    pub(crate) fn resize_series(&mut self, series: &SeriesRef, desired: usize) {
        let Ok(mut current) = self.tree.series_len(series) else {
            return;
        };
        if current != desired {
            debug!(%series, current, desired, "resizing series");
        }
        while current < desired {
            if self.clone_instance(series, None).is_err() {
                return;
            }
            current += 1;
        }
        while current > desired {
            if self.tree.remove_instance(series, current).is_err() {
                return;
            }
            current -= 1;
        }
        self.update_series_disabled(series, desired);
    }

    pub(crate) fn update_series_disabled(&mut self, series: &SeriesRef, count: usize) {
        if !self.config.zero_count_disables_group {
            return;
        }
        let disable = count == 0 && !self.effective_relevance(&series.parent).is_irrelevant();
        if disable == self.disabled_series.contains(series) {
            return;
        }
        if disable {
            self.disabled_series.insert(series.clone());
        } else {
            self.disabled_series.remove(series);
        }
        self.view.series_disabled(series, disable);
    }

    /// Clones the series template into a fresh instance. The insertion
    /// event carries it to `init_new_instance` on the next pump cycle.
    pub(crate) fn clone_instance(
        &mut self,
        series: &SeriesRef,
        at: Option<usize>,
    ) -> Result<usize, ModelError> {
        let Some(template) = self.templates.get(&series.path()) else {
            return Err(ModelError::series_not_found(series));
        };
        let instance = template.clone();
        self.tree.insert_instance(series, instance, at)
    }

    /// First-touch setup for an instance that just landed: defaults, then
    /// every binding scoped inside it, then readonly presentation.
    pub(crate) fn init_new_instance(&mut self, series: &SeriesRef, ordinal: usize) {
        let root = series.instance(ordinal);
        let subtree = self.tree.subtree_refs(&root);
        for nref in &subtree {
            self.freshly_cloned.insert(nref.clone());
        }
        let series_path = series.path();
        for (path, expr) in self.defaults.clone() {
            if !path.starts_with(&series_path) {
                continue;
            }
            for nref in &subtree {
                if nref.path() != path || self.tree.value(nref).is_some_and(|v| !v.is_empty()) {
                    continue;
                }
                match self.evaluate(&expr, nref) {
                    Ok(value) => {
                        let text = value.to_text();
                        if !text.is_empty() {
                            self.write_value(nref, &text);
                        }
                    }
                    Err(err) => self.report_eval_issue(&path, &expr, err),
                }
            }
        }
        let mut branches = Vec::new();
        let mut calcs = Vec::new();
        let mut itemsets = Vec::new();
        for nref in &subtree {
            for &id in self.registry.of_target(&nref.path()) {
                match self.registry.binding(id).kind {
                    BindingKind::Relevant => branches.push((id, nref.clone())),
                    BindingKind::Calculate => calcs.push((id, nref.clone())),
                    BindingKind::Itemset => itemsets.push((id, nref.clone())),
                    _ => {}
                }
            }
        }
        for (id, nref) in branches {
            self.apply_branch_instance(id, &nref);
        }
        calcs.sort_by_key(|(id, _)| self.registry.calc_rank(*id));
        for (id, nref) in calcs {
            self.run_calc_instance(id, &nref);
        }
        for (id, nref) in itemsets {
            self.refresh_itemset_instance(id, &nref);
        }
        for nref in &subtree {
            if self.readonly.contains(&nref.path()) {
                self.view.readonly_changed(nref, true);
            }
        }
        self.normalize_inner_series(&series_path, &root);
        debug!(%series, ordinal, "instance initialized");
    }

    /// Series nested inside a fresh clone mirror initial-load structure:
    /// counted series reconcile within this instance, minimal ones start
    /// empty instead of inheriting the template's instance.
    fn normalize_inner_series(&mut self, series_path: &Path, root: &NodeRef) {
        let mut inner: Vec<(Path, RepeatMeta)> = self
            .repeat_meta
            .iter()
            .filter(|(p, _)| series_path.is_ancestor_of(p))
            .map(|(p, m)| (p.clone(), *m))
            .collect();
        inner.sort_by_key(|(p, _)| (p.depth(), p.clone()));
        for (path, meta) in inner {
            if meta.has_count {
                let id = self
                    .registry
                    .find(&path, BindingKind::RepeatCount)
                    .map(|b| b.id);
                if let Some(id) = id {
                    self.reconcile_count(id, root);
                }
            } else if meta.minimal {
                let Some(parent_path) = path.parent() else {
                    continue;
                };
                let name = path.leaf().to_string();
                let parents: Vec<NodeRef> = self
                    .tree
                    .refs_of(&parent_path)
                    .into_iter()
                    .filter(|p| p.starts_with(root))
                    .collect();
                for parent in parents {
                    let series = SeriesRef::new(parent, name.clone());
                    let Ok(len) = self.tree.series_len(&series) else {
                        continue;
                    };
                    for ordinal in (1..=len).rev() {
                        let _ = self.tree.remove_instance(&series, ordinal);
                    }
                }
            }
        }
    }

    /// Drops per-instance caches after ordinals shift. Stale validation
    /// failures downgrade to valid rather than sticking to the wrong
    /// instance; touched nodes re-validate on their next edit.
    pub(crate) fn purge_series_state(&mut self, series: &SeriesRef) {
        self.freshly_cloned.retain(|n| !in_series(n, series));
        self.itemset_state.retain(|n, _| !in_series(n, series));
        self.validation_pending.retain(|n, _| !in_series(n, series));
        let stale: Vec<NodeRef> = self
            .validation_state
            .keys()
            .filter(|n| in_series(n, series))
            .cloned()
            .collect();
        for nref in stale {
            self.store_outcome(&nref, ValidationOutcome::Valid);
        }
    }

    /// Recomputes option lists inside a series after a removal, where the
    /// survivors' option expressions may now see different siblings.
    pub(crate) fn refresh_series_itemsets(&mut self, series: &SeriesRef) {
        let series_path = series.path();
        let ids: Vec<(BindingId, Path)> = self
            .registry
            .bindings()
            .filter(|b| b.kind == BindingKind::Itemset && b.target.starts_with(&series_path))
            .map(|b| (b.id, b.target.clone()))
            .collect();
        for (id, target) in ids {
            for nref in self.tree.refs_of(&target) {
                if in_series(&nref, series) {
                    self.refresh_itemset_instance(id, &nref);
                }
            }
        }
    }
}
