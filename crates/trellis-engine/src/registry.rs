//! The binding registry: every declared expression with its resolved
//! dependency set, plus the static evaluation order for calculations.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use trellis_core::{NodeRef, Path, RefPattern};
use trellis_expr::Evaluator;

use crate::definition::{DefinitionError, FormDefinition};
use crate::diagnostics::FormIssue;

/// Stable handle of one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(usize);

impl BindingId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a binding's expression governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Relevant,
    Calculate,
    Constraint,
    Required,
    Itemset,
    RepeatCount,
}

/// One declared expression bound to a target path.
///
/// `deps` holds the index-free paths the expression reads, resolved once at
/// build against the target's first-instance context. Per-instance scoping
/// happens during propagation, not here.
#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    pub kind: BindingKind,
    pub target: Path,
    pub expr: String,
    pub deps: Vec<Path>,
}

#[derive(Debug, Default)]
pub struct Registry {
    bindings: Vec<Binding>,
    by_target: HashMap<Path, Vec<BindingId>>,
    calc_order: Vec<BindingId>,
    calc_rank: HashMap<BindingId, usize>,
    cyclic: Vec<BindingId>,
}

impl Registry {
    /// Compile every declaration into a binding with a resolved dependency
    /// set. Declarations whose target the definition's structure cannot
    /// produce are skipped with a diagnostic; unparseable expressions fail
    /// the build.
    pub fn build(
        definition: &FormDefinition,
        evaluator: &dyn Evaluator,
    ) -> Result<(Registry, Vec<FormIssue>), DefinitionError> {
        let schema = definition.schema_paths();
        let mut registry = Registry::default();
        let mut issues = Vec::new();

        for decl in &definition.bindings {
            let Some(target) = checked_target(&decl.nodeset, &schema, &mut issues)? else {
                continue;
            };
            let exprs = [
                (BindingKind::Relevant, decl.relevant.as_deref()),
                (BindingKind::Calculate, decl.calculate.as_deref()),
                (BindingKind::Constraint, decl.constraint.as_deref()),
                (BindingKind::Required, decl.required.as_deref()),
            ];
            for (kind, expr) in exprs {
                if let Some(expr) = expr {
                    registry.insert(kind, target.clone(), expr, evaluator, &mut issues)?;
                }
            }
        }
        for decl in &definition.selects {
            let Some(target) = checked_target(&decl.nodeset, &schema, &mut issues)? else {
                continue;
            };
            registry.insert(
                BindingKind::Itemset,
                target,
                &decl.itemset,
                evaluator,
                &mut issues,
            )?;
        }
        for decl in &definition.repeats {
            let Some(expr) = decl.count.as_deref() else {
                continue;
            };
            let Some(target) = checked_target(&decl.nodeset, &schema, &mut issues)? else {
                continue;
            };
            registry.insert(BindingKind::RepeatCount, target, expr, evaluator, &mut issues)?;
        }

        registry.order_calculations(&mut issues);
        debug!(
            bindings = registry.bindings.len(),
            calculations = registry.calc_order.len(),
            "registry built"
        );
        Ok((registry, issues))
    }

    fn insert(
        &mut self,
        kind: BindingKind,
        target: Path,
        expr: &str,
        evaluator: &dyn Evaluator,
        issues: &mut Vec<FormIssue>,
    ) -> Result<BindingId, DefinitionError> {
        let id = BindingId(self.bindings.len());
        // Resolution is syntactic, so count expressions can anchor at the
        // series' first instance even when zero instances exist.
        let context = NodeRef::first(&target);
        let mut deps = Vec::new();
        for reference in evaluator.refs(expr)? {
            let resolved = RefPattern::resolve(&reference, &context).and_then(|p| p.path());
            let dep = match resolved {
                Ok(path) => path,
                Err(_) => {
                    issues.push(FormIssue::structural(&target, &reference));
                    continue;
                }
            };
            // Self-references (". != ''" style constraints) never count as
            // dependencies.
            if dep == target {
                continue;
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self.by_target.entry(target.clone()).or_default().push(id);
        self.bindings.push(Binding {
            id,
            kind,
            target,
            expr: expr.to_string(),
            deps,
        });
        Ok(id)
    }

    /// Order calculations so producers run before consumers. Bindings left
    /// unplaced form at least one cycle; they are reported and excluded.
    fn order_calculations(&mut self, issues: &mut Vec<FormIssue>) {
        let calc_ids: Vec<BindingId> = self
            .bindings
            .iter()
            .filter(|b| b.kind == BindingKind::Calculate)
            .map(|b| b.id)
            .collect();

        let mut producers: HashMap<&Path, Vec<BindingId>> = HashMap::new();
        for &id in &calc_ids {
            producers
                .entry(&self.bindings[id.0].target)
                .or_default()
                .push(id);
        }
        let mut indegree: HashMap<BindingId, usize> =
            calc_ids.iter().map(|&id| (id, 0)).collect();
        let mut downstream: HashMap<BindingId, Vec<BindingId>> = HashMap::new();
        for &id in &calc_ids {
            for dep in &self.bindings[id.0].deps {
                for &producer in producers.get(dep).map(Vec::as_slice).unwrap_or(&[]) {
                    downstream.entry(producer).or_default().push(id);
                    *indegree.get_mut(&id).expect("calc id present") += 1;
                }
            }
        }

        let mut order: Vec<BindingId> = Vec::new();
        let mut placed: HashSet<BindingId> = HashSet::new();
        loop {
            let ready: Vec<BindingId> = calc_ids
                .iter()
                .copied()
                .filter(|id| !placed.contains(id) && indegree[id] == 0)
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                placed.insert(id);
                order.push(id);
                for &next in downstream.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                    *indegree.get_mut(&next).expect("calc id present") -= 1;
                }
            }
        }

        let cyclic: Vec<BindingId> = calc_ids
            .iter()
            .copied()
            .filter(|id| !placed.contains(id))
            .collect();
        if !cyclic.is_empty() {
            let targets: Vec<Path> = cyclic
                .iter()
                .map(|id| self.bindings[id.0].target.clone())
                .collect();
            issues.push(FormIssue::cycle(targets));
        }
        self.calc_rank = order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        self.calc_order = order;
        self.cyclic = cyclic;
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0]
    }

    /// Bindings declared on `target`, in declaration order.
    pub fn of_target(&self, target: &Path) -> &[BindingId] {
        self.by_target.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The binding of `kind` declared on `target`, if any.
    pub fn find(&self, target: &Path, kind: BindingKind) -> Option<&Binding> {
        self.of_target(target)
            .iter()
            .map(|&id| self.binding(id))
            .find(|b| b.kind == kind)
    }

    /// Static calculation order, producers first. Cyclic bindings are
    /// absent.
    pub fn calc_order(&self) -> &[BindingId] {
        &self.calc_order
    }

    /// Position of a calculation in the static order; anything unplaced
    /// sorts last.
    pub fn calc_rank(&self, id: BindingId) -> usize {
        self.calc_rank.get(&id).copied().unwrap_or(usize::MAX)
    }

    /// Calculations caught in a static cycle at build.
    pub fn cyclic(&self) -> &[BindingId] {
        &self.cyclic
    }
}

fn checked_target(
    nodeset: &str,
    schema: &HashSet<Path>,
    issues: &mut Vec<FormIssue>,
) -> Result<Option<Path>, DefinitionError> {
    let target =
        Path::new(nodeset).map_err(|e| DefinitionError::invalid_target(nodeset, e.to_string()))?;
    if !schema.contains(&target) {
        issues.push(FormIssue::structural(&target, nodeset));
        return Ok(None);
    }
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use trellis_expr::SimpleEvaluator;

    use super::*;
    use crate::definition::FormDefinition;

    fn build(json: &str) -> (Registry, Vec<FormIssue>) {
        let definition = FormDefinition::from_json(json).unwrap();
        Registry::build(&definition, &SimpleEvaluator::new()).unwrap()
    }

    fn path(raw: &str) -> Path {
        Path::new(raw).unwrap()
    }

    // -- dependency resolution ---------------------------------------------

    #[test]
    fn deps_resolve_relative_references() {
        let (registry, issues) = build(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "rep", "children": [{"name": "num"}, {"name": "calc"}]},
                    {"name": "outside"}
                ]},
                "bindings": [
                    {"nodeset": "/d/rep/calc", "calculate": "../num * 20 + /d/outside"}
                ]
            }"#,
        );
        assert!(issues.is_empty());
        let binding = registry
            .find(&path("/d/rep/calc"), BindingKind::Calculate)
            .unwrap();
        assert_eq!(binding.deps, vec![path("/d/rep/num"), path("/d/outside")]);
    }

    #[test]
    fn self_references_are_not_dependencies() {
        let (registry, _) = build(
            r#"{
                "instance": {"name": "d", "children": [{"name": "age"}]},
                "bindings": [
                    {"nodeset": "/d/age", "constraint": ". > 0 and . < 120"}
                ]
            }"#,
        );
        let binding = registry
            .find(&path("/d/age"), BindingKind::Constraint)
            .unwrap();
        assert!(binding.deps.is_empty());
    }

    #[test]
    fn count_expressions_resolve_against_the_series_parent() {
        let (registry, _) = build(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "how_many"},
                    {"name": "rep", "children": [{"name": "n"}]}
                ]},
                "repeats": [{"nodeset": "/d/rep", "count": "../how_many"}]
            }"#,
        );
        let binding = registry
            .find(&path("/d/rep"), BindingKind::RepeatCount)
            .unwrap();
        assert_eq!(binding.deps, vec![path("/d/how_many")]);
    }

    // -- target checking ---------------------------------------------------

    #[test]
    fn unknown_targets_are_skipped_with_a_diagnostic() {
        let (registry, issues) = build(
            r#"{
                "instance": {"name": "d", "children": [{"name": "a"}]},
                "bindings": [
                    {"nodeset": "/d/ghost", "relevant": "true()"},
                    {"nodeset": "/d/a", "relevant": "true()"}
                ]
            }"#,
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            issues[0],
            FormIssue::StructuralReference { .. }
        ));
    }

    // -- calculation ordering ----------------------------------------------

    #[test]
    fn calculations_order_producers_first() {
        let (registry, issues) = build(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "a"}, {"name": "b"}, {"name": "c"}
                ]},
                "bindings": [
                    {"nodeset": "/d/c", "calculate": "/d/b + 1"},
                    {"nodeset": "/d/b", "calculate": "/d/a + 1"}
                ]
            }"#,
        );
        assert!(issues.is_empty());
        let order: Vec<&str> = registry
            .calc_order()
            .iter()
            .map(|&id| registry.binding(id).target.as_str())
            .collect();
        assert_eq!(order, vec!["/d/b", "/d/c"]);
        assert!(registry.calc_rank(registry.calc_order()[0]) < registry.calc_rank(registry.calc_order()[1]));
    }

    #[test]
    fn cycles_are_reported_and_excluded_from_the_order() {
        let (registry, issues) = build(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "a"}, {"name": "b"}, {"name": "free"}
                ]},
                "bindings": [
                    {"nodeset": "/d/a", "calculate": "/d/b + 1"},
                    {"nodeset": "/d/b", "calculate": "/d/a + 1"},
                    {"nodeset": "/d/free", "calculate": "1 + 1"}
                ]
            }"#,
        );
        assert_eq!(registry.cyclic().len(), 2);
        assert_eq!(registry.calc_order().len(), 1);
        assert!(issues.iter().any(FormIssue::is_cycle));
    }

    #[test]
    fn bad_expressions_fail_the_build() {
        let definition = FormDefinition::from_json(
            r#"{
                "instance": {"name": "d", "children": [{"name": "a"}]},
                "bindings": [{"nodeset": "/d/a", "calculate": "1 +"}]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            Registry::build(&definition, &SimpleEvaluator::new()),
            Err(DefinitionError::Expression(_))
        ));
    }
}
