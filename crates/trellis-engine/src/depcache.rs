//! Reverse dependency index: which bindings read a given instance path.

use std::collections::BTreeMap;
use std::ops::Bound;

use trellis_core::Path;

use crate::registry::{BindingId, Registry};

/// Immutable map from read paths to reader bindings, built once after the
/// registry. Propagation never rescans expressions.
#[derive(Debug, Default)]
pub(crate) struct DepCache {
    readers: BTreeMap<Path, Vec<BindingId>>,
}

impl DepCache {
    pub(crate) fn build(registry: &Registry) -> DepCache {
        let mut readers: BTreeMap<Path, Vec<BindingId>> = BTreeMap::new();
        for binding in registry.bindings() {
            for dep in &binding.deps {
                let entry = readers.entry(dep.clone()).or_default();
                if !entry.contains(&binding.id) {
                    entry.push(binding.id);
                }
            }
        }
        DepCache { readers }
    }

    /// Bindings that read exactly `path`.
    pub(crate) fn readers_of(&self, path: &Path) -> &[BindingId] {
        self.readers.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bindings that read `path` or anything beneath it, in first-seen
    /// order. Used when a whole subtree appears or disappears at once.
    ///
    /// Key order is plain string order, where step names containing
    /// characters below '/' (such as '-' or '.') sort between a prefix and
    /// its descendants; the range is therefore over-approximated up to
    /// `prefix + "0"` ('0' is the first character after '/') and filtered
    /// down to real step-boundary matches.
    pub(crate) fn readers_under(&self, path: &Path) -> Vec<BindingId> {
        let mut out: Vec<BindingId> = Vec::new();
        let prefix = path.as_str();
        let upper = format!("{prefix}0");
        let bounds = (Bound::Included(prefix), Bound::Excluded(upper.as_str()));
        for (key, ids) in self.readers.range::<str, _>(bounds) {
            if !key.starts_with(path) {
                continue;
            }
            for id in ids {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.readers.len()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use trellis_expr::SimpleEvaluator;

    use super::*;
    use crate::definition::FormDefinition;

    fn cache_for(json: &str) -> (Registry, DepCache) {
        let definition = FormDefinition::from_json(json).unwrap();
        let (registry, issues) = Registry::build(&definition, &SimpleEvaluator::new()).unwrap();
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
        let cache = DepCache::build(&registry);
        (registry, cache)
    }

    fn path(raw: &str) -> Path {
        Path::new(raw).unwrap()
    }

    #[test]
    fn exact_readers() {
        let (registry, cache) = cache_for(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "a"}, {"name": "b"}, {"name": "twice"}
                ]},
                "bindings": [
                    {"nodeset": "/d/b", "calculate": "/d/a + 1"},
                    {"nodeset": "/d/twice", "calculate": "/d/a + /d/b"}
                ]
            }"#,
        );
        assert_eq!(cache.len(), 2);
        let readers = cache.readers_of(&path("/d/a"));
        assert_eq!(readers.len(), 2);
        let targets: Vec<&str> = readers
            .iter()
            .map(|&id| registry.binding(id).target.as_str())
            .collect();
        assert_eq!(targets, vec!["/d/b", "/d/twice"]);
        assert!(cache.readers_of(&path("/d/twice")).is_empty());
    }

    #[test]
    fn subtree_readers_respect_step_boundaries() {
        // "/d/rep-note" sorts between "/d/rep" and "/d/rep/n" in plain
        // string order; it must not count as part of the series subtree.
        let (registry, cache) = cache_for(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "rep", "children": [{"name": "n"}]},
                    {"name": "rep-note"},
                    {"name": "repx"},
                    {"name": "total"},
                    {"name": "note_copy"},
                    {"name": "x_copy"}
                ]},
                "bindings": [
                    {"nodeset": "/d/total", "calculate": "sum(/d/rep/n) + count(/d/rep)"},
                    {"nodeset": "/d/note_copy", "calculate": "/d/rep-note"},
                    {"nodeset": "/d/x_copy", "calculate": "/d/repx"}
                ]
            }"#,
        );
        let under = cache.readers_under(&path("/d/rep"));
        assert_eq!(under.len(), 1);
        assert_eq!(registry.binding(under[0]).target.as_str(), "/d/total");
    }

    #[test]
    fn subtree_readers_deduplicate() {
        let (_, cache) = cache_for(
            r#"{
                "instance": {"name": "d", "children": [
                    {"name": "rep", "children": [{"name": "a"}, {"name": "b"}]},
                    {"name": "both"}
                ]},
                "bindings": [
                    {"nodeset": "/d/both", "calculate": "sum(/d/rep/a) + sum(/d/rep/b)"}
                ]
            }"#,
        );
        assert_eq!(cache.readers_under(&path("/d/rep")).len(), 1);
    }
}
