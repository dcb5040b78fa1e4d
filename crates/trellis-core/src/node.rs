//! In-memory instance nodes.

use crate::doc::DocNode;

/// Visibility state of a node, driven by `relevant` bindings.
///
/// Nodes start at `PreInit` until the first branch evaluation has run;
/// transitions out of `PreInit` fire presentation events but no clearing,
/// so loaded records keep their values even in hidden branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Relevance {
    #[default]
    PreInit,
    Relevant,
    Irrelevant,
}

impl Relevance {
    pub fn is_relevant(self) -> bool {
        matches!(self, Self::Relevant)
    }

    pub fn is_irrelevant(self) -> bool {
        matches!(self, Self::Irrelevant)
    }

    pub fn is_pre_init(self) -> bool {
        matches!(self, Self::PreInit)
    }
}

/// One element of the instance document.
///
/// Nodes own their children exclusively and never point back at their
/// parent; everything above a node is expressed through [`crate::NodeRef`]
/// addressing. An empty `value` means "no value".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub value: String,
    pub children: Vec<Node>,
    pub relevance: Relevance,
}

impl Node {
    /// A branch node with no value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            children: Vec::new(),
            relevance: Relevance::PreInit,
        }
    }

    /// A leaf node carrying a value.
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children: Vec::new(),
            relevance: Relevance::PreInit,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The `index`-th (1-based) child named `name`.
    pub fn child(&self, name: &str, index: usize) -> Option<&Node> {
        self.children.iter().filter(|c| c.name == name).nth(index - 1)
    }

    pub fn child_mut(&mut self, name: &str, index: usize) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .filter(|c| c.name == name)
            .nth(index - 1)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Number of children named `name`.
    pub fn count_named(&self, name: &str) -> usize {
        self.children_named(name).count()
    }

    /// Clear this node's value and every descendant value.
    pub fn clear_values(&mut self) {
        self.value.clear();
        for child in &mut self.children {
            child.clear_values();
        }
    }

    /// Returns `true` if this node and all descendants hold empty values.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.children.iter().all(Node::is_empty)
    }

    /// Build a node (sub)tree from its serialized form. All nodes start at
    /// `PreInit`.
    pub fn from_doc(doc: &DocNode) -> Self {
        Self {
            name: doc.name.clone(),
            value: doc.value.clone(),
            children: doc.children.iter().map(Node::from_doc).collect(),
            relevance: Relevance::PreInit,
        }
    }

    /// Serialize this subtree.
    ///
    /// With `include_irrelevant` false an irrelevant node is omitted along
    /// with its whole subtree, regardless of descendant states (an
    /// irrelevant ancestor dominates). `PreInit` counts as relevant here.
    pub fn to_doc(&self, include_irrelevant: bool) -> Option<DocNode> {
        if !include_irrelevant && self.relevance.is_irrelevant() {
            return None;
        }
        Some(DocNode {
            name: self.name.clone(),
            value: self.value.clone(),
            children: self
                .children
                .iter()
                .filter_map(|c| c.to_doc(include_irrelevant))
                .collect(),
        })
    }
}
