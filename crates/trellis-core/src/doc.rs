//! Serialized instance documents.
//!
//! A [`DocNode`] tree is the interchange form of an instance: form
//! definitions embed one as the blank instance, saved records are parsed
//! back into one, and [`crate::InstanceTree::serialize`] renders one.
//! Child order is meaningful; repeated siblings appear as repeated entries.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One element of a serialized instance document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocNode {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocNode>,
}

impl DocNode {
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            children: Vec::new(),
        }
    }

    pub fn branch(name: impl Into<String>, children: Vec<DocNode>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            children,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// First document-order descendant at `steps` (names only, no indices).
    /// `steps` excludes this node's own name.
    pub fn find(&self, steps: &[&str]) -> Option<&DocNode> {
        let Some((first, rest)) = steps.split_first() else {
            return Some(self);
        };
        self.children
            .iter()
            .find(|c| c.name == *first)
            .and_then(|c| c.find(rest))
    }

    /// All direct children named `name`.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DocNode> {
        self.children.iter().filter(move |c| c.name == name)
    }
}
