//! Fully-qualified node references, e.g. `/household/member[2]/name`.
//!
//! A [`NodeRef`] addresses exactly one concrete node: every step carries a
//! 1-based index among same-named siblings (`[1]` is implied and elided when
//! printed). Nodes never hold parent pointers, so a `NodeRef` is the only
//! durable handle the engine and hosts pass around.

use std::fmt;

use crate::error::{ModelError, Result};
use crate::path::{Path, validate_step};

/// One step of a [`NodeRef`]: element name plus 1-based sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Step {
    pub name: String,
    pub index: usize,
}

/// Absolute reference to a single concrete node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    steps: Vec<Step>,
}

impl NodeRef {
    /// Reference to a document root element.
    pub fn root(name: &str) -> Self {
        Self {
            steps: vec![Step {
                name: name.to_string(),
                index: 1,
            }],
        }
    }

    /// The first instance along every step of `path`.
    pub fn first(path: &Path) -> Self {
        Self {
            steps: path
                .steps()
                .map(|name| Step {
                    name: name.to_string(),
                    index: 1,
                })
                .collect(),
        }
    }

    /// Parse `/a/b[2]/c`; a missing index means `[1]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(ModelError::invalid_reference(raw, "must start with '/'"));
        };
        if rest.is_empty() {
            return Err(ModelError::invalid_reference(raw, "empty reference"));
        }
        let mut steps = Vec::new();
        for part in rest.split('/') {
            let (name, index) = split_step(raw, part)?;
            steps.push(Step {
                name: name.to_string(),
                index: index.unwrap_or(1),
            });
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn leaf_name(&self) -> &str {
        &self.steps[self.steps.len() - 1].name
    }

    pub fn leaf_index(&self) -> usize {
        self.steps[self.steps.len() - 1].index
    }

    pub fn child(&self, name: &str, index: usize) -> NodeRef {
        let mut steps = self.steps.clone();
        steps.push(Step {
            name: name.to_string(),
            index,
        });
        NodeRef { steps }
    }

    pub fn parent(&self) -> Option<NodeRef> {
        if self.steps.len() <= 1 {
            return None;
        }
        Some(NodeRef {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// The repeat series this node is an instance of (its parent plus its
    /// own name). `None` for the root.
    pub fn series(&self) -> Option<SeriesRef> {
        Some(SeriesRef {
            parent: self.parent()?,
            name: self.leaf_name().to_string(),
        })
    }

    /// Drop the indices, leaving the template path.
    pub fn path(&self) -> Path {
        let mut raw = String::new();
        for step in &self.steps {
            raw.push('/');
            raw.push_str(&step.name);
        }
        Path::new(raw).expect("node ref steps are validated")
    }

    /// Returns `true` if `self` equals `prefix` or descends from it,
    /// comparing both names and indices.
    pub fn starts_with(&self, prefix: &NodeRef) -> bool {
        self.steps.len() >= prefix.steps.len()
            && self.steps[..prefix.steps.len()] == prefix.steps[..]
    }

    /// Returns `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &NodeRef) -> bool {
        other.steps.len() > self.steps.len() && other.starts_with(self)
    }

    /// Repeat-scope compatibility between two refs.
    ///
    /// Walks both refs from the root while step names agree; any index
    /// mismatch inside that shared prefix means the refs live in different
    /// instances of a common repeat ancestor. A change in one repeat
    /// instance must not re-trigger bindings in a sibling instance.
    pub fn same_scope(&self, other: &NodeRef) -> bool {
        for (a, b) in self.steps.iter().zip(other.steps.iter()) {
            if a.name != b.name {
                return true;
            }
            if a.index != b.index {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "/{}", step.name)?;
            if step.index > 1 {
                write!(f, "[{}]", step.index)?;
            }
        }
        Ok(())
    }
}

/// One ordered run of repeat instances: a concrete parent plus the shared
/// child element name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesRef {
    pub parent: NodeRef,
    pub name: String,
}

impl SeriesRef {
    pub fn new(parent: NodeRef, name: impl Into<String>) -> Self {
        Self {
            parent,
            name: name.into(),
        }
    }

    /// The template path shared by every instance in the series.
    pub fn path(&self) -> Path {
        self.parent.path().child(&self.name)
    }

    /// The ref of the `ordinal`-th instance (1-based).
    pub fn instance(&self, ordinal: usize) -> NodeRef {
        self.parent.child(&self.name, ordinal)
    }
}

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}

/// A reference expression resolved against a context: a run of steps that
/// are each either pinned to one sibling index (inherited from the context
/// or written as an explicit `[n]` predicate) or free, matching every
/// same-named sibling in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPattern {
    steps: Vec<PatternStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternStep {
    pub name: String,
    pub index: Option<usize>,
}

impl RefPattern {
    /// Resolve `reference` against `context`.
    ///
    /// Absolute references restart at the document root with all steps free.
    /// Relative references (`.`, `..`, bare child names) start from the
    /// context with every inherited step pinned to the context's indices.
    pub fn resolve(reference: &str, context: &NodeRef) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ModelError::invalid_reference(reference, "empty reference"));
        }
        let (mut steps, rest): (Vec<PatternStep>, &str) =
            if let Some(abs) = reference.strip_prefix('/') {
                if abs.is_empty() {
                    return Err(ModelError::invalid_reference(reference, "bare '/'"));
                }
                (Vec::new(), abs)
            } else {
                let pinned = context
                    .steps()
                    .iter()
                    .map(|s| PatternStep {
                        name: s.name.clone(),
                        index: Some(s.index),
                    })
                    .collect();
                (pinned, reference)
            };

        for part in rest.split('/') {
            match part {
                "" => {
                    return Err(ModelError::invalid_reference(reference, "empty step"));
                }
                "." => {}
                ".." => {
                    if steps.pop().is_none() {
                        return Err(ModelError::invalid_reference(
                            reference,
                            "escapes the document root",
                        ));
                    }
                }
                _ => {
                    let (name, index) = split_step(reference, part)?;
                    steps.push(PatternStep {
                        name: name.to_string(),
                        index,
                    });
                }
            }
        }
        if steps.is_empty() {
            return Err(ModelError::invalid_reference(
                reference,
                "resolves above the document root",
            ));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PatternStep] {
        &self.steps
    }

    /// The index-free path this pattern covers.
    pub fn path(&self) -> Result<Path> {
        let mut raw = String::new();
        for step in &self.steps {
            raw.push('/');
            raw.push_str(&step.name);
        }
        Path::new(raw)
    }
}

impl fmt::Display for RefPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            write!(f, "/{}", step.name)?;
            if let Some(i) = step.index {
                write!(f, "[{i}]")?;
            }
        }
        Ok(())
    }
}

/// Split `name[3]` into `("name", Some(3))`; plain `name` has no index.
fn split_step<'a>(raw: &str, part: &'a str) -> Result<(&'a str, Option<usize>)> {
    let (name, index) = match part.find('[') {
        Some(open) => {
            let Some(inner) = part[open..].strip_prefix('[').and_then(|s| s.strip_suffix(']'))
            else {
                return Err(ModelError::invalid_reference(raw, "unterminated '['"));
            };
            let index: usize = inner
                .parse()
                .map_err(|_| ModelError::invalid_reference(raw, "non-numeric index"))?;
            if index == 0 {
                return Err(ModelError::invalid_reference(raw, "indices are 1-based"));
            }
            (&part[..open], Some(index))
        }
        None => (part, None),
    };
    validate_step(raw, name)?;
    Ok((name, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nref(raw: &str) -> NodeRef {
        NodeRef::parse(raw).unwrap()
    }

    // -- parse & display ---------------------------------------------------

    #[test]
    fn parse_and_display() {
        let r = nref("/data/rep[2]/name");
        assert_eq!(r.depth(), 3);
        assert_eq!(r.leaf_name(), "name");
        assert_eq!(r.leaf_index(), 1);
        assert_eq!(r.steps()[1].index, 2);
        assert_eq!(r.to_string(), "/data/rep[2]/name");
        // [1] is implied and elided.
        assert_eq!(nref("/data/rep[1]/name").to_string(), "/data/rep/name");
    }

    #[test]
    fn parse_rejects_bad_refs() {
        assert!(NodeRef::parse("data").is_err());
        assert!(NodeRef::parse("/data/rep[0]").is_err());
        assert!(NodeRef::parse("/data/rep[x]").is_err());
        assert!(NodeRef::parse("/data/rep[2").is_err());
    }

    #[test]
    fn path_strips_indices() {
        assert_eq!(nref("/data/rep[2]/name").path().as_str(), "/data/rep/name");
    }

    // -- ancestry ----------------------------------------------------------

    #[test]
    fn ancestry_is_index_aware() {
        let parent = nref("/data/rep[2]");
        assert!(parent.is_ancestor_of(&nref("/data/rep[2]/name")));
        assert!(!parent.is_ancestor_of(&nref("/data/rep[3]/name")));
        assert!(!parent.is_ancestor_of(&parent));
        assert!(parent.starts_with(&parent));
    }

    #[test]
    fn series_of_instance() {
        let s = nref("/data/hh[2]/member[3]").series().unwrap();
        assert_eq!(s.parent, nref("/data/hh[2]"));
        assert_eq!(s.name, "member");
        assert_eq!(s.path().as_str(), "/data/hh/member");
        assert_eq!(s.instance(4), nref("/data/hh[2]/member[4]"));
    }

    // -- scope compatibility -----------------------------------------------

    #[test]
    fn same_scope_rules() {
        // Same repeat instance: compatible.
        assert!(nref("/d/rep[2]/calc").same_scope(&nref("/d/rep[2]/num")));
        // Sibling instances: incompatible.
        assert!(!nref("/d/rep[1]/calc").same_scope(&nref("/d/rep[2]/num")));
        // Divergent branches: compatible (no shared repeat context).
        assert!(nref("/d/rep[1]/calc").same_scope(&nref("/d/outside")));
        // One ref is an ancestor prefix of the other: compatible.
        assert!(nref("/d/rep[2]").same_scope(&nref("/d/rep[2]/num")));
        // Nested repeats compare every shared step.
        assert!(!nref("/d/hh[2]/member[1]/age").same_scope(&nref("/d/hh[2]/member[2]/name")));
        assert!(nref("/d/hh[2]/member[1]/age").same_scope(&nref("/d/hh[2]/member[1]/name")));
    }

    // -- reference resolution ----------------------------------------------

    #[test]
    fn resolve_absolute_reference() {
        let ctx = nref("/d/rep[2]/calc");
        let p = RefPattern::resolve("/d/outside", &ctx).unwrap();
        assert_eq!(p.to_string(), "/d/outside");
        assert!(p.steps().iter().all(|s| s.index.is_none()));
    }

    #[test]
    fn resolve_relative_reference_pins_context() {
        let ctx = nref("/d/rep[2]/calc");
        let p = RefPattern::resolve("../num1", &ctx).unwrap();
        assert_eq!(p.to_string(), "/d[1]/rep[2]/num1");
        assert_eq!(p.path().unwrap().as_str(), "/d/rep/num1");

        let dot = RefPattern::resolve(".", &ctx).unwrap();
        assert_eq!(dot.to_string(), "/d[1]/rep[2]/calc[1]");

        let child = RefPattern::resolve("./sub/leaf", &nref("/d/grp")).unwrap();
        assert_eq!(child.path().unwrap().as_str(), "/d/grp/sub/leaf");
    }

    #[test]
    fn resolve_with_explicit_predicate() {
        let p = RefPattern::resolve("/d/rep[2]/num1", &NodeRef::root("d")).unwrap();
        assert_eq!(p.steps()[1].index, Some(2));
        assert_eq!(p.steps()[2].index, None);
    }

    #[test]
    fn resolve_rejects_escapes() {
        let ctx = nref("/d/x");
        assert!(RefPattern::resolve("../../../y", &ctx).is_err());
        assert!(RefPattern::resolve("", &ctx).is_err());
    }
}
