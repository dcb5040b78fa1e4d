//! The mutable instance tree -- single source of truth for form data.
//!
//! Every mutation goes through this type and leaves behind a
//! [`ModelEvent`] in an internal buffer. The engine drains the buffer after
//! each call and decides what to re-evaluate; the tree itself knows nothing
//! about bindings.

use std::collections::HashMap;

use crate::doc::DocNode;
use crate::error::{ModelError, Result};
use crate::event::ModelEvent;
use crate::node::{Node, Relevance};
use crate::noderef::{NodeRef, RefPattern, SeriesRef, Step};
use crate::path::Path;

/// Options for [`InstanceTree::serialize`].
#[derive(Debug, Clone, Copy)]
pub struct SerializeOptions {
    /// Keep irrelevant subtrees in the output. `false` prunes each
    /// irrelevant node together with everything below it.
    pub include_irrelevant: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            include_irrelevant: true,
        }
    }
}

/// The hierarchical data document a form instance is bound to.
#[derive(Debug, Clone)]
pub struct InstanceTree {
    root: Node,
    /// Child-name order per branch path, captured from the seeding
    /// document. Keeps the insert position of a repeat series stable even
    /// after its last instance was removed.
    layout: HashMap<Path, Vec<String>>,
    events: Vec<ModelEvent>,
}

impl InstanceTree {
    pub fn new(root: Node) -> Self {
        let mut layout = HashMap::new();
        record_layout(&root, Path::root(&root.name), &mut layout);
        Self {
            root,
            layout,
            events: Vec::new(),
        }
    }

    pub fn from_doc(doc: &DocNode) -> Self {
        Self::new(Node::from_doc(doc))
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_ref(&self) -> NodeRef {
        NodeRef::root(&self.root.name)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The node addressed by `nref`, if it exists.
    pub fn node(&self, nref: &NodeRef) -> Option<&Node> {
        let (first, rest) = nref.steps().split_first()?;
        if first.name != self.root.name || first.index != 1 {
            return None;
        }
        descend(&self.root, rest)
    }

    fn node_mut(&mut self, nref: &NodeRef) -> Option<&mut Node> {
        let (first, rest) = nref.steps().split_first()?;
        if first.name != self.root.name || first.index != 1 {
            return None;
        }
        descend_mut(&mut self.root, rest)
    }

    pub fn contains(&self, nref: &NodeRef) -> bool {
        self.node(nref).is_some()
    }

    pub fn value(&self, nref: &NodeRef) -> Option<&str> {
        self.node(nref).map(|n| n.value.as_str())
    }

    pub fn relevance(&self, nref: &NodeRef) -> Option<Relevance> {
        self.node(nref).map(|n| n.relevance)
    }

    /// All concrete refs matching `path`, in document order.
    pub fn refs_of(&self, path: &Path) -> Vec<NodeRef> {
        let names: Vec<&str> = path.steps().collect();
        let mut out = Vec::new();
        if names.first() != Some(&self.root.name.as_str()) {
            return out;
        }
        collect_named(&self.root, self.root_ref(), &names[1..], &mut out);
        out
    }

    /// The `ordinal`-th (1-based) document-order match of `path`.
    pub fn nth(&self, path: &Path, ordinal: usize) -> Option<NodeRef> {
        if ordinal == 0 {
            return None;
        }
        self.refs_of(path).into_iter().nth(ordinal - 1)
    }

    /// Number of document-order matches of `path`.
    pub fn count_of(&self, path: &Path) -> usize {
        self.refs_of(path).len()
    }

    /// All concrete refs matching a resolved reference pattern, in document
    /// order. Pinned steps must match exactly; free steps fan out.
    pub fn resolve_pattern(&self, pattern: &RefPattern) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let Some((first, rest)) = pattern.steps().split_first() else {
            return out;
        };
        if first.name != self.root.name || first.index.is_some_and(|i| i != 1) {
            return out;
        }
        collect_pattern(&self.root, self.root_ref(), rest, &mut out);
        out
    }

    /// `nref` plus every descendant, in document order.
    pub fn subtree_refs(&self, nref: &NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        if let Some(node) = self.node(nref) {
            collect_subtree(node, nref.clone(), &mut out);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Set a node's value. Returns `Ok(false)` and emits nothing when the
    /// value is already current.
    pub fn set_value(&mut self, nref: &NodeRef, value: &str) -> Result<bool> {
        let Some(node) = self.node_mut(nref) else {
            return Err(ModelError::node_not_found(nref));
        };
        if node.value == value {
            return Ok(false);
        }
        node.value = value.to_string();
        self.events.push(ModelEvent::ValueChanged { node: nref.clone() });
        Ok(true)
    }

    /// Update a node's relevance state. Relevance is engine-managed
    /// presentation state, so no model event is emitted.
    pub fn set_relevance(&mut self, nref: &NodeRef, relevance: Relevance) -> Result<bool> {
        let Some(node) = self.node_mut(nref) else {
            return Err(ModelError::node_not_found(nref));
        };
        if node.relevance == relevance {
            return Ok(false);
        }
        node.relevance = relevance;
        Ok(true)
    }

    /// Number of instances currently in `series`.
    pub fn series_len(&self, series: &SeriesRef) -> Result<usize> {
        let Some(parent) = self.node(&series.parent) else {
            return Err(ModelError::series_not_found(series));
        };
        Ok(parent.count_named(&series.name))
    }

    /// Insert a prepared instance into `series` at `at` (1-based; `None`
    /// appends). Returns the ordinal the instance landed on.
    pub fn insert_instance(
        &mut self,
        series: &SeriesRef,
        instance: Node,
        at: Option<usize>,
    ) -> Result<usize> {
        debug_assert_eq!(instance.name, series.name);
        let order = self.layout.get(&series.parent.path()).cloned();
        let Some(parent) = self.node_mut(&series.parent) else {
            return Err(ModelError::series_not_found(series));
        };

        let slots: Vec<usize> = parent
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == series.name)
            .map(|(i, _)| i)
            .collect();
        let existing = slots.len();
        let ordinal = at.unwrap_or(existing + 1).clamp(1, existing + 1);

        let pos = if let Some(&slot) = slots.get(ordinal - 1) {
            slot
        } else if let Some(&last) = slots.last() {
            last + 1
        } else {
            layout_position(parent, order.as_deref(), &series.name)
        };
        parent.children.insert(pos, instance);

        let shifted: Vec<usize> = if ordinal <= existing {
            (ordinal + 1..=existing + 1).collect()
        } else {
            Vec::new()
        };
        self.events.push(ModelEvent::InstanceAdded {
            series: series.clone(),
            ordinal,
            shifted,
        });
        Ok(ordinal)
    }

    /// Remove the `ordinal`-th instance of `series`. Later instances keep
    /// their position in the child vector, which renumbers them down by one.
    pub fn remove_instance(&mut self, series: &SeriesRef, ordinal: usize) -> Result<()> {
        let Some(parent) = self.node_mut(&series.parent) else {
            return Err(ModelError::series_not_found(series));
        };
        let slots: Vec<usize> = parent
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == series.name)
            .map(|(i, _)| i)
            .collect();
        if ordinal == 0 || ordinal > slots.len() {
            return Err(ModelError::ordinal_not_found(series, ordinal));
        }
        parent.children.remove(slots[ordinal - 1]);

        let shifted: Vec<usize> = (ordinal..slots.len()).collect();
        self.events.push(ModelEvent::InstanceRemoved {
            series: series.clone(),
            ordinal,
            shifted,
        });
        Ok(())
    }

    /// Drain the buffered mutation events.
    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    pub fn to_doc(&self, include_irrelevant: bool) -> DocNode {
        self.root
            .to_doc(include_irrelevant)
            .unwrap_or_else(|| DocNode::branch(self.root.name.clone(), Vec::new()))
    }

    pub fn serialize(&self, options: SerializeOptions) -> Result<String> {
        self.to_doc(options.include_irrelevant).to_json()
    }
}

fn descend<'a>(mut node: &'a Node, steps: &[Step]) -> Option<&'a Node> {
    for step in steps {
        node = node.child(&step.name, step.index)?;
    }
    Some(node)
}

fn descend_mut<'a>(mut node: &'a mut Node, steps: &[Step]) -> Option<&'a mut Node> {
    for step in steps {
        node = node.child_mut(&step.name, step.index)?;
    }
    Some(node)
}

fn collect_named(node: &Node, nref: NodeRef, rest: &[&str], out: &mut Vec<NodeRef>) {
    let Some((next, tail)) = rest.split_first() else {
        out.push(nref);
        return;
    };
    let mut index = 0;
    for child in &node.children {
        if child.name == *next {
            index += 1;
            collect_named(child, nref.child(next, index), tail, out);
        }
    }
}

fn collect_pattern(
    node: &Node,
    nref: NodeRef,
    rest: &[crate::noderef::PatternStep],
    out: &mut Vec<NodeRef>,
) {
    let Some((next, tail)) = rest.split_first() else {
        out.push(nref);
        return;
    };
    let mut index = 0;
    for child in &node.children {
        if child.name == next.name {
            index += 1;
            if next.index.is_none_or(|want| want == index) {
                collect_pattern(child, nref.child(&next.name, index), tail, out);
            }
        }
    }
}

fn collect_subtree(node: &Node, nref: NodeRef, out: &mut Vec<NodeRef>) {
    out.push(nref.clone());
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for child in &node.children {
        let index = counts.entry(child.name.as_str()).or_insert(0);
        *index += 1;
        collect_subtree(child, nref.child(&child.name, *index), out);
    }
}

fn record_layout(node: &Node, path: Path, layout: &mut HashMap<Path, Vec<String>>) {
    if node.children.is_empty() {
        return;
    }
    let mut order: Vec<String> = Vec::new();
    for child in &node.children {
        if !order.iter().any(|n| n == &child.name) {
            order.push(child.name.clone());
        }
        record_layout(child, path.child(&child.name), layout);
    }
    layout.insert(path, order);
}

/// Child-vector position for the first instance of a series whose siblings
/// are all gone: right before the first child whose name comes after the
/// series name in the seeding document's child order.
fn layout_position(parent: &Node, order: Option<&[String]>, name: &str) -> usize {
    let Some(order) = order else {
        return parent.children.len();
    };
    let after: Vec<&String> = order.iter().skip_while(|n| n.as_str() != name).skip(1).collect();
    parent
        .children
        .iter()
        .position(|c| after.iter().any(|n| *n == &c.name))
        .unwrap_or(parent.children.len())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_doc() -> DocNode {
        DocNode::branch(
            "data",
            vec![
                DocNode::leaf("intro", "hi"),
                DocNode::branch(
                    "rep",
                    vec![DocNode::leaf("num", "1"), DocNode::leaf("calc", "")],
                ),
                DocNode::branch(
                    "rep",
                    vec![DocNode::leaf("num", "2"), DocNode::leaf("calc", "")],
                ),
                DocNode::leaf("outro", "bye"),
            ],
        )
    }

    fn tree() -> InstanceTree {
        InstanceTree::from_doc(&sample_doc())
    }

    fn nref(raw: &str) -> NodeRef {
        NodeRef::parse(raw).unwrap()
    }

    fn path(raw: &str) -> Path {
        Path::new(raw).unwrap()
    }

    fn rep_series() -> SeriesRef {
        SeriesRef::new(NodeRef::root("data"), "rep")
    }

    // -- lookup ------------------------------------------------------------

    #[test]
    fn lookup_by_ref_and_path() {
        let t = tree();
        assert_eq!(t.value(&nref("/data/rep[2]/num")), Some("2"));
        assert_eq!(t.value(&nref("/data/rep/num")), Some("1"));
        assert_eq!(t.value(&nref("/data/rep[3]/num")), None);

        let refs = t.refs_of(&path("/data/rep/num"));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], nref("/data/rep[1]/num"));
        assert_eq!(refs[1], nref("/data/rep[2]/num"));

        assert_eq!(t.nth(&path("/data/rep/num"), 2), Some(nref("/data/rep[2]/num")));
        assert_eq!(t.nth(&path("/data/rep/num"), 0), None);
        assert_eq!(t.count_of(&path("/data/rep")), 2);
    }

    #[test]
    fn pattern_resolution_fans_out_free_steps() {
        let t = tree();
        let ctx = nref("/data/rep[2]/calc");
        let pinned = RefPattern::resolve("../num", &ctx).unwrap();
        assert_eq!(t.resolve_pattern(&pinned), vec![nref("/data/rep[2]/num")]);

        let free = RefPattern::resolve("/data/rep/num", &ctx).unwrap();
        assert_eq!(t.resolve_pattern(&free).len(), 2);
    }

    // -- value mutation ----------------------------------------------------

    #[test]
    fn set_value_detects_change() {
        let mut t = tree();
        assert!(t.set_value(&nref("/data/intro"), "hello").unwrap());
        assert_eq!(
            t.take_events(),
            vec![ModelEvent::ValueChanged {
                node: nref("/data/intro")
            }]
        );
        // Same value again: no change, no event.
        assert!(!t.set_value(&nref("/data/intro"), "hello").unwrap());
        assert!(t.take_events().is_empty());
    }

    #[test]
    fn set_value_on_missing_node_errors() {
        let mut t = tree();
        let err = t.set_value(&nref("/data/ghost"), "x").unwrap_err();
        assert!(err.is_missing_target());
        assert!(t.take_events().is_empty());
    }

    // -- instance lifecycle ------------------------------------------------

    #[test]
    fn append_instance() {
        let mut t = tree();
        let inst = Node::new("rep");
        let ordinal = t.insert_instance(&rep_series(), inst, None).unwrap();
        assert_eq!(ordinal, 3);
        assert_eq!(t.series_len(&rep_series()).unwrap(), 3);
        // Appended after rep[2], before outro.
        let root = t.root();
        assert_eq!(root.children[3].name, "rep");
        assert_eq!(root.children[4].name, "outro");
        assert_eq!(
            t.take_events(),
            vec![ModelEvent::InstanceAdded {
                series: rep_series(),
                ordinal: 3,
                shifted: vec![],
            }]
        );
    }

    #[test]
    fn insert_in_the_middle_shifts_later_ordinals() {
        let mut t = tree();
        t.insert_instance(&rep_series(), Node::new("rep"), Some(1)).unwrap();
        let events = t.take_events();
        assert_eq!(
            events,
            vec![ModelEvent::InstanceAdded {
                series: rep_series(),
                ordinal: 1,
                shifted: vec![2, 3],
            }]
        );
        // The old rep[1] is now rep[2].
        assert_eq!(t.value(&nref("/data/rep[2]/num")), Some("1"));
    }

    #[test]
    fn remove_instance_renumbers_down() {
        let mut t = tree();
        t.remove_instance(&rep_series(), 1).unwrap();
        assert_eq!(
            t.take_events(),
            vec![ModelEvent::InstanceRemoved {
                series: rep_series(),
                ordinal: 1,
                shifted: vec![1],
            }]
        );
        // The old rep[2] is now rep[1].
        assert_eq!(t.value(&nref("/data/rep/num")), Some("2"));
        assert_eq!(t.series_len(&rep_series()).unwrap(), 1);

        let err = t.remove_instance(&rep_series(), 5).unwrap_err();
        assert!(err.is_missing_target());
    }

    #[test]
    fn series_position_survives_emptying() {
        let mut t = tree();
        t.remove_instance(&rep_series(), 2).unwrap();
        t.remove_instance(&rep_series(), 1).unwrap();
        assert_eq!(t.series_len(&rep_series()).unwrap(), 0);

        t.insert_instance(&rep_series(), Node::new("rep"), None).unwrap();
        // Back between intro and outro, not at the end.
        let names: Vec<&str> = t.root().children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["intro", "rep", "outro"]);
    }

    // -- serialization -----------------------------------------------------

    #[test]
    fn serialize_prunes_irrelevant_subtrees() {
        let mut t = tree();
        t.set_relevance(&nref("/data/rep[1]"), Relevance::Irrelevant).unwrap();
        let doc = t.to_doc(false);
        let names: Vec<&str> = doc.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["intro", "rep", "outro"]);
        assert_eq!(doc.children[1].children[0].value, "2");

        // Default options keep everything.
        let full = t.to_doc(true);
        assert_eq!(full.children.len(), 4);
    }

    #[test]
    fn serialize_json_shape() {
        let mut t = tree();
        t.remove_instance(&rep_series(), 2).unwrap();
        let json = t.serialize(SerializeOptions::default()).unwrap();
        insta::assert_snapshot!(json, @r#"
        {
          "name": "data",
          "children": [
            {
              "name": "intro",
              "value": "hi"
            },
            {
              "name": "rep",
              "children": [
                {
                  "name": "num",
                  "value": "1"
                },
                {
                  "name": "calc"
                }
              ]
            },
            {
              "name": "outro",
              "value": "bye"
            }
          ]
        }
        "#);
    }
}
