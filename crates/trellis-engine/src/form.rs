//! The form facade.
//!
//! [`Form::init`] wires a parsed definition, an optional saved record, an
//! evaluator, and a view into one reactive unit, then runs the initial
//! evaluation pass. After that every mutation enters through the public
//! methods here, and [`Form::pump`] drives the tree's event buffer to a
//! fixed point before the call returns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use tracing::{debug, info, warn};
use trellis_config::EngineConfig;
use trellis_core::{
    DocNode, InstanceTree, ModelError, ModelEvent, Node, NodeRef, Path, Relevance,
    SerializeOptions, SeriesRef,
};
use trellis_expr::{Choice, Evaluator};

use crate::definition::{DefinitionError, FormDefinition};
use crate::depcache::DepCache;
use crate::diagnostics::FormIssue;
use crate::registry::{BindingId, BindingKind, Registry};
use crate::repeat::clamp_count;
use crate::validation::ValidationOutcome;
use crate::view::FormView;

/// Static facts about one repeat series.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RepeatMeta {
    /// Start with zero instances instead of one when no record seeds the
    /// series.
    pub(crate) minimal: bool,
    pub(crate) has_count: bool,
}

/// A live form instance.
pub struct Form {
    pub(crate) tree: InstanceTree,
    pub(crate) registry: Registry,
    pub(crate) cache: DepCache,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) view: Box<dyn FormView>,
    pub(crate) config: EngineConfig,
    pub(crate) title: String,
    pub(crate) choices: HashMap<String, Vec<Choice>>,
    pub(crate) templates: HashMap<Path, Node>,
    pub(crate) repeat_meta: HashMap<Path, RepeatMeta>,
    pub(crate) defaults: Vec<(Path, String)>,
    pub(crate) readonly: HashSet<Path>,
    pub(crate) multi_selects: HashSet<Path>,
    pub(crate) queue: VecDeque<ModelEvent>,
    pub(crate) issues: Vec<FormIssue>,
    /// Bindings taken out of service, either statically cyclic or runtime
    /// offenders caught by the propagation guard.
    pub(crate) disabled: HashSet<BindingId>,
    pub(crate) disabled_series: HashSet<SeriesRef>,
    /// Per-mutation evaluation counter behind the propagation guard.
    /// Cleared at the start of every external mutation.
    pub(crate) eval_counts: HashMap<(BindingId, NodeRef), u32>,
    pub(crate) itemset_state: HashMap<NodeRef, Vec<Choice>>,
    pub(crate) validation_seq: u64,
    pub(crate) validation_pending: HashMap<NodeRef, u64>,
    pub(crate) validation_tasks: VecDeque<(u64, NodeRef)>,
    /// Failures only; a node absent here is valid.
    pub(crate) validation_state: HashMap<NodeRef, ValidationOutcome>,
    /// Nodes of repeat instances not yet touched by the user. They skip
    /// non-forced validation so a fresh clone never opens with errors.
    pub(crate) freshly_cloned: HashSet<NodeRef>,
    pub(crate) edited: bool,
    pub(crate) initializing: bool,
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("title", &self.title)
            .field("edited", &self.edited)
            .field("initializing", &self.initializing)
            .finish_non_exhaustive()
    }
}

impl Form {
    /// Builds a form from its definition, optionally merging a saved
    /// record, then runs the initial evaluation to a fixed point.
    pub fn init(
        definition: &FormDefinition,
        record: Option<&DocNode>,
        config: EngineConfig,
        evaluator: Box<dyn Evaluator>,
        view: Box<dyn FormView>,
    ) -> Result<Form, DefinitionError> {
        let (registry, mut issues) = Registry::build(definition, evaluator.as_ref())?;

        let mut templates = HashMap::new();
        let mut repeat_meta = HashMap::new();
        for decl in &definition.repeats {
            let path = Path::new(decl.nodeset.clone())
                .map_err(|err| DefinitionError::invalid_target(&decl.nodeset, err.to_string()))?;
            let template = definition.derive_template(decl)?;
            repeat_meta.insert(
                path.clone(),
                RepeatMeta {
                    minimal: decl.minimal,
                    has_count: decl.count.is_some(),
                },
            );
            templates.insert(path, template);
        }

        let mut defaults = Vec::new();
        let mut readonly = HashSet::new();
        for decl in &definition.bindings {
            let Ok(path) = Path::new(decl.nodeset.clone()) else {
                continue;
            };
            if let Some(expr) = &decl.default {
                defaults.push((path.clone(), expr.clone()));
            }
            if decl.readonly {
                readonly.insert(path);
            }
        }
        let multi_selects = definition
            .selects
            .iter()
            .filter(|s| s.multiple)
            .filter_map(|s| Path::new(s.nodeset.clone()).ok())
            .collect();

        let tree = match record {
            Some(record) => merged_tree(definition, record, &mut issues)?,
            None => InstanceTree::from_doc(&definition.instance),
        };
        let disabled: HashSet<BindingId> = registry.cyclic().iter().copied().collect();

        let mut form = Form {
            tree,
            cache: DepCache::build(&registry),
            registry,
            evaluator,
            view,
            config,
            title: definition.title.clone(),
            choices: definition.choices.clone(),
            templates,
            repeat_meta,
            defaults,
            readonly,
            multi_selects,
            queue: VecDeque::new(),
            issues,
            disabled,
            disabled_series: HashSet::new(),
            eval_counts: HashMap::new(),
            itemset_state: HashMap::new(),
            validation_seq: 0,
            validation_pending: HashMap::new(),
            validation_tasks: VecDeque::new(),
            validation_state: HashMap::new(),
            freshly_cloned: HashSet::new(),
            edited: false,
            initializing: true,
        };

        if record.is_none() {
            form.normalize_structure();
        }
        form.apply_initial_defaults();
        form.initial_pass();
        form.pump();
        form.initializing = false;
        form.edited = false;
        form.freshly_cloned.clear();
        form.eval_counts.clear();
        info!(
            title = %form.title,
            bindings = form.registry.len(),
            issues = form.issues.len(),
            "form initialized"
        );
        Ok(form)
    }

    // -----------------------------------------------------------------------
    // Initial evaluation
    // -----------------------------------------------------------------------

    /// Settles repeat cardinalities for a blank form: count expressions
    /// win, otherwise one instance unless the repeat is minimal. The
    /// structure established here is the baseline, not a mutation to react
    /// to, so the resulting events are dropped.
    fn normalize_structure(&mut self) {
        let mut metas: Vec<(Path, RepeatMeta)> = self
            .repeat_meta
            .iter()
            .map(|(p, m)| (p.clone(), *m))
            .collect();
        metas.sort_by_key(|(p, _)| (p.depth(), p.clone()));
        for (series_path, meta) in metas {
            let Some(parent_path) = series_path.parent() else {
                continue;
            };
            let name = series_path.leaf().to_string();
            for parent in self.tree.refs_of(&parent_path) {
                let series = SeriesRef::new(parent, name.clone());
                let Ok(len) = self.tree.series_len(&series) else {
                    continue;
                };
                let count = self
                    .registry
                    .find(&series_path, BindingKind::RepeatCount)
                    .map(|b| b.expr.clone());
                if let Some(expr) = count {
                    let context = series.instance(1);
                    match self.evaluate(&expr, &context) {
                        Ok(value) => self.resize_series(&series, clamp_count(&value)),
                        Err(err) => self.report_eval_issue(&series_path, &expr, err),
                    }
                } else if len == 0 && !meta.minimal {
                    let _ = self.clone_instance(&series, None);
                } else if len > 0 && meta.minimal {
                    for ordinal in (1..=len).rev() {
                        let _ = self.tree.remove_instance(&series, ordinal);
                    }
                }
            }
        }
        self.tree.take_events();
    }

    /// One-time default expressions for still-empty nodes. Runs before
    /// relevance is known; a default landing in a branch that then turns
    /// out hidden simply stays stored. Events are dropped because the
    /// global pass that follows covers every consumer anyway.
    fn apply_initial_defaults(&mut self) {
        for (path, expr) in self.defaults.clone() {
            for nref in self.tree.refs_of(&path) {
                if self.tree.value(&nref).is_some_and(|v| !v.is_empty()) {
                    continue;
                }
                match self.evaluate(&expr, &nref) {
                    Ok(value) => {
                        let text = value.to_text();
                        if !text.is_empty() {
                            self.write_value(&nref, &text);
                        }
                    }
                    Err(err) => self.report_eval_issue(&path, &expr, err),
                }
            }
        }
        self.tree.take_events();
    }

    /// Evaluates every binding once over the whole tree: branches top-down
    /// so ancestor dominance short-circuits descendants, calculations in
    /// topological order, then option lists, then presentation state.
    fn initial_pass(&mut self) {
        let mut branches: Vec<(usize, BindingId)> = self
            .registry
            .bindings()
            .filter(|b| b.kind == BindingKind::Relevant)
            .map(|b| (b.target.depth(), b.id))
            .collect();
        branches.sort_by_key(|(depth, _)| *depth);
        for (_, id) in branches {
            let target = self.registry.binding(id).target.clone();
            for nref in self.tree.refs_of(&target) {
                self.apply_branch_instance(id, &nref);
            }
        }

        for id in self.registry.calc_order().to_vec() {
            let target = self.registry.binding(id).target.clone();
            for nref in self.tree.refs_of(&target) {
                self.run_calc_instance(id, &nref);
            }
        }

        let itemsets: Vec<BindingId> = self
            .registry
            .bindings()
            .filter(|b| b.kind == BindingKind::Itemset)
            .map(|b| b.id)
            .collect();
        for id in itemsets {
            let target = self.registry.binding(id).target.clone();
            for nref in self.tree.refs_of(&target) {
                self.refresh_itemset_instance(id, &nref);
            }
        }

        let mut readonly: Vec<Path> = self.readonly.iter().cloned().collect();
        readonly.sort();
        for path in readonly {
            for nref in self.tree.refs_of(&path) {
                self.view.readonly_changed(&nref, true);
            }
        }

        // Counted series report their disabled state even when the count
        // was adopted from a record rather than reconciled.
        let mut counted: Vec<Path> = self
            .repeat_meta
            .iter()
            .filter(|(_, m)| m.has_count)
            .map(|(p, _)| p.clone())
            .collect();
        counted.sort();
        for series_path in counted {
            let Some(parent_path) = series_path.parent() else {
                continue;
            };
            let name = series_path.leaf().to_string();
            for parent in self.tree.refs_of(&parent_path) {
                let series = SeriesRef::new(parent, name.clone());
                if let Ok(len) = self.tree.series_len(&series) {
                    self.update_series_disabled(&series, len);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Drains the tree's event buffer, re-running affected bindings until
    /// no further mutations occur, then settles deferred validation.
    pub(crate) fn pump(&mut self) {
        self.queue.extend(self.tree.take_events());
        while let Some(event) = self.queue.pop_front() {
            debug!(?event, "propagating");
            self.notify(&event);
            match &event {
                ModelEvent::ValueChanged { node } => self.react_to_value(node),
                ModelEvent::InstanceAdded {
                    series,
                    ordinal,
                    shifted,
                } => {
                    if !shifted.is_empty() {
                        self.purge_series_state(series);
                    }
                    self.init_new_instance(series, *ordinal);
                    self.react_to_structure(series);
                }
                ModelEvent::InstanceRemoved { series, .. } => {
                    self.purge_series_state(series);
                    self.refresh_series_itemsets(series);
                    self.react_to_structure(series);
                }
            }
            self.queue.extend(self.tree.take_events());
        }
        if !self.initializing {
            self.settle_validation();
        }
    }

    fn notify(&mut self, event: &ModelEvent) {
        match event {
            ModelEvent::ValueChanged { node } => {
                let value = self.tree.value(node).unwrap_or_default().to_string();
                self.view.value_changed(node, &value);
            }
            ModelEvent::InstanceAdded {
                series, ordinal, ..
            } => self.view.repeat_added(series, *ordinal),
            ModelEvent::InstanceRemoved {
                series, ordinal, ..
            } => self.view.repeat_removed(series, *ordinal),
        }
    }

    fn react_to_value(&mut self, origin: &NodeRef) {
        let readers = self.cache.readers_of(&origin.path()).to_vec();
        if !readers.is_empty() {
            self.run_readers(readers, origin);
        }
    }

    /// Structural changes dirty every reader under the series path: sums
    /// over the series, positions of sibling instances, counts.
    fn react_to_structure(&mut self, series: &SeriesRef) {
        let readers = self.cache.readers_under(&series.path());
        if !readers.is_empty() {
            self.run_readers(readers, &series.parent);
        }
    }

    /// Re-runs a batch of dirty bindings, counts before branches before
    /// calculations before option lists, each scoped to the repeat
    /// instances compatible with `origin`.
    fn run_readers(&mut self, readers: Vec<BindingId>, origin: &NodeRef) {
        let mut counts = Vec::new();
        let mut branches = Vec::new();
        let mut calcs = Vec::new();
        let mut itemsets = Vec::new();
        let mut checks = Vec::new();
        for id in readers {
            match self.registry.binding(id).kind {
                BindingKind::RepeatCount => counts.push(id),
                BindingKind::Relevant => branches.push(id),
                BindingKind::Calculate => calcs.push(id),
                BindingKind::Itemset => itemsets.push(id),
                BindingKind::Required | BindingKind::Constraint => checks.push(id),
            }
        }
        for id in counts {
            self.reconcile_count(id, origin);
        }
        for id in branches {
            self.refresh_branch(id, origin);
        }
        self.run_calculations(calcs, origin);
        for id in itemsets {
            self.refresh_itemset(id, origin);
        }
        if self.config.validate_continuously && !self.initializing {
            for id in checks {
                let target = self.registry.binding(id).target.clone();
                for node in self.scoped_targets(&target, origin) {
                    self.schedule_validation(&node, false);
                }
            }
        }
    }

    /// Concrete instances of `target` whose repeat scope is compatible
    /// with the instance the triggering change happened in.
    pub(crate) fn scoped_targets(&self, target: &Path, origin: &NodeRef) -> Vec<NodeRef> {
        self.tree
            .refs_of(target)
            .into_iter()
            .filter(|n| n.same_scope(origin))
            .collect()
    }

    /// Admission check before evaluating a binding on a node. Counts
    /// evaluations since the last external mutation; crossing the limit
    /// means a runtime cycle, which disables the binding and records a
    /// diagnostic.
    pub(crate) fn guard_binding(&mut self, id: BindingId, node: &NodeRef) -> bool {
        if self.disabled.contains(&id) {
            return false;
        }
        let count = self.eval_counts.entry((id, node.clone())).or_insert(0);
        *count += 1;
        if *count > self.config.max_propagation_passes {
            let target = self.registry.binding(id).target.clone();
            warn!(%target, %node, "propagation limit hit, disabling binding");
            self.issues.push(FormIssue::cycle(vec![target]));
            self.disabled.insert(id);
            return false;
        }
        true
    }

    /// Writes through to the tree, treating a vanished target as a no-op.
    /// Propagation can race a shrinking repeat, and a write whose target
    /// was removed mid-flight is simply stale.
    pub(crate) fn write_value(&mut self, node: &NodeRef, value: &str) {
        if let Err(err) = self.tree.set_value(node, value) {
            debug!(%node, %err, "dropping write to vanished node");
        }
    }

    pub(crate) fn report_eval_issue(
        &mut self,
        target: &Path,
        expr: &str,
        reason: impl fmt::Display,
    ) {
        let issue = FormIssue::evaluation(target, expr, reason);
        debug!(%issue, "expression failed");
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tree(&self) -> &InstanceTree {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Everything that went wrong so far: build-time structural problems
    /// plus runtime evaluation failures and cycles.
    pub fn diagnostics(&self) -> &[FormIssue] {
        &self.issues
    }

    /// True once any user-visible mutation landed after init.
    pub fn edited(&self) -> bool {
        self.edited
    }

    /// Parses an indexed reference and checks it against the live tree.
    pub fn resolve(&self, reference: &str) -> Result<NodeRef, ModelError> {
        let node = NodeRef::parse(reference)?;
        if !self.tree.contains(&node) {
            return Err(ModelError::node_not_found(&node));
        }
        Ok(node)
    }

    /// Parses a reference to a repeat series, e.g. `/data/member`.
    pub fn series_at(&self, reference: &str) -> Result<SeriesRef, ModelError> {
        let node = NodeRef::parse(reference)?;
        let Some(series) = node.series() else {
            return Err(ModelError::invalid_reference(
                reference,
                "the root is not repeatable",
            ));
        };
        if !self.tree.contains(&series.parent) {
            return Err(ModelError::series_not_found(&series));
        }
        Ok(series)
    }

    pub fn value(&self, node: &NodeRef) -> Option<&str> {
        self.tree.value(node)
    }

    /// Effective relevance: an irrelevant ancestor dominates the node's
    /// own state.
    pub fn relevance(&self, node: &NodeRef) -> Relevance {
        self.effective_relevance(node)
    }

    pub fn validation(&self, node: &NodeRef) -> ValidationOutcome {
        self.validation_state.get(node).copied().unwrap_or_default()
    }

    pub fn is_readonly(&self, node: &NodeRef) -> bool {
        self.readonly.contains(&node.path())
    }

    pub fn is_series_disabled(&self, series: &SeriesRef) -> bool {
        self.disabled_series.contains(series)
    }

    /// The current option list of a select node, once computed.
    pub fn options(&self, node: &NodeRef) -> Option<&[Choice]> {
        self.itemset_state.get(node).map(Vec::as_slice)
    }

    pub fn serialize(&self, options: SerializeOptions) -> trellis_core::Result<String> {
        self.tree.serialize(options)
    }

    pub fn to_doc(&self, include_irrelevant: bool) -> DocNode {
        self.tree.to_doc(include_irrelevant)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Sets a node's value and propagates. Returns `Ok(false)` when the
    /// write changed nothing (same value, or the node is readonly).
    pub fn set_value(&mut self, node: &NodeRef, value: &str) -> Result<bool, ModelError> {
        if self.readonly.contains(&node.path()) {
            debug!(%node, "rejected write to readonly node");
            return Ok(false);
        }
        if !self.tree.set_value(node, value)? {
            return Ok(false);
        }
        self.edited = true;
        self.freshly_cloned.remove(node);
        self.eval_counts.clear();
        self.pump();
        self.schedule_validation(node, true);
        self.settle_validation();
        Ok(true)
    }

    /// Inserts a new instance into `series` at `at` (1-based, appends when
    /// `None`) and propagates. Returns the ordinal it landed on.
    pub fn add_instance(
        &mut self,
        series: &SeriesRef,
        at: Option<usize>,
    ) -> Result<usize, ModelError> {
        self.eval_counts.clear();
        let ordinal = self.clone_instance(series, at)?;
        self.edited = true;
        self.pump();
        Ok(ordinal)
    }

    /// Removes the `ordinal`-th instance of `series` and propagates.
    /// Later siblings renumber down by one.
    pub fn remove_instance(
        &mut self,
        series: &SeriesRef,
        ordinal: usize,
    ) -> Result<(), ModelError> {
        self.eval_counts.clear();
        self.tree.remove_instance(series, ordinal)?;
        self.edited = true;
        self.pump();
        Ok(())
    }

    /// Sweeps the values out of every effectively irrelevant node. For
    /// hosts running with deferred clearing, typically right before a
    /// final serialization.
    pub fn clear_irrelevant(&mut self) {
        self.eval_counts.clear();
        let root = self.tree.root_ref();
        for nref in self.tree.subtree_refs(&root) {
            if self.effective_relevance(&nref).is_irrelevant()
                && self.tree.value(&nref).is_some_and(|v| !v.is_empty())
            {
                self.write_value(&nref, "");
            }
        }
        self.pump();
    }
}

// ---------------------------------------------------------------------------
// Record merge
// ---------------------------------------------------------------------------

/// Seeds the tree from a saved record: schema nodes missing from the
/// record are healed in from the definition instance, except repeat series,
/// whose recorded cardinality is authoritative. Record nodes unknown to the
/// schema stay in the tree and are diagnosed.
fn merged_tree(
    definition: &FormDefinition,
    record: &DocNode,
    issues: &mut Vec<FormIssue>,
) -> Result<InstanceTree, DefinitionError> {
    if record.name != definition.instance.name {
        return Err(DefinitionError::RecordMismatch {
            expected: definition.instance.name.clone(),
            found: record.name.clone(),
        });
    }
    let repeats: HashSet<Path> = definition
        .repeats
        .iter()
        .filter_map(|r| Path::new(r.nodeset.clone()).ok())
        .collect();
    let mut merged = record.clone();
    let root_path = Path::root(&definition.instance.name);
    heal_missing(&mut merged, &definition.instance, &root_path, &repeats);
    report_unknown(&merged, &root_path, &definition.schema_paths(), issues);
    Ok(InstanceTree::from_doc(&merged))
}

fn heal_missing(node: &mut DocNode, schema: &DocNode, path: &Path, repeats: &HashSet<Path>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for schema_child in &schema.children {
        if !seen.insert(schema_child.name.as_str()) {
            continue;
        }
        let child_path = path.child(&schema_child.name);
        let present = node.children.iter().any(|c| c.name == schema_child.name);
        if present {
            for child in node
                .children
                .iter_mut()
                .filter(|c| c.name == schema_child.name)
            {
                heal_missing(child, schema_child, &child_path, repeats);
            }
        } else if !repeats.contains(&child_path) {
            node.children.push(schema_child.clone());
        }
    }
}

fn report_unknown(
    node: &DocNode,
    path: &Path,
    schema: &HashSet<Path>,
    issues: &mut Vec<FormIssue>,
) {
    for child in &node.children {
        let child_path = path.child(&child.name);
        if !schema.contains(&child_path) {
            // One diagnostic per unknown subtree root.
            issues.push(FormIssue::structural(path, &child.name));
            continue;
        }
        report_unknown(child, &child_path, schema, issues);
    }
}
