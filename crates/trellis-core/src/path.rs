//! Index-free template paths, e.g. `/household/member/name`.
//!
//! A [`Path`] identifies a *location* in the document schema, not a concrete
//! node: every instance of a repeated group shares the same path. Concrete
//! nodes are addressed by [`crate::NodeRef`], which adds per-step sibling
//! indices.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// An absolute, index-free path through the instance document.
///
/// Ordered lexicographically by segment, so all descendants of a path sort
/// directly after it. The dependency cache relies on this for prefix scans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(String);

impl Path {
    /// Parse and validate an absolute path.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(ModelError::invalid_path(&raw, "must start with '/'"));
        };
        if rest.is_empty() {
            return Err(ModelError::invalid_path(&raw, "empty path"));
        }
        for step in rest.split('/') {
            validate_step(&raw, step)?;
        }
        Ok(Self(raw))
    }

    /// The path of a document root element.
    pub fn root(name: &str) -> Self {
        Self(format!("/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Step names, root first.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    pub fn depth(&self) -> usize {
        self.steps().count()
    }

    /// Name of the last step.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<Path> {
        let cut = self.0.rfind('/')?;
        if cut == 0 {
            return None;
        }
        Some(Path(self.0[..cut].to_string()))
    }

    /// Extend with one child step. The name is assumed valid.
    pub fn child(&self, name: &str) -> Path {
        Path(format!("{}/{name}", self.0))
    }

    /// Returns `true` if `self` is `prefix` or a descendant of it.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes()[prefix.0.len()] == b'/')
    }

    /// Returns `true` if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        other.0.len() > self.0.len() && other.starts_with(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lets ordered collections keyed by `Path` be range-queried with plain
/// string bounds. `Ord` on `Path` is exactly `Ord` on the inner string, so
/// the `Borrow` contract holds.
impl std::borrow::Borrow<str> for Path {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Step names may not contain separators, predicates, or whitespace.
pub(crate) fn validate_step(raw: &str, step: &str) -> Result<()> {
    if step.is_empty() {
        return Err(ModelError::invalid_path(raw, "empty step"));
    }
    if step == "." || step == ".." {
        return Err(ModelError::invalid_path(raw, "relative step in absolute path"));
    }
    if let Some(bad) = step
        .chars()
        .find(|c| matches!(c, '/' | '[' | ']') || c.is_whitespace())
    {
        return Err(ModelError::invalid_path(
            raw,
            format!("illegal character '{bad}' in step '{step}'"),
        ));
    }
    Ok(())
}
