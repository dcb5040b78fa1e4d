//! Parsed form definitions: instance document, binding declarations,
//! repeats, selects, and named choice lists.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trellis_core::{DocNode, Node, Path};
use trellis_expr::Choice;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to parse form definition: {reason}")]
    Parse { reason: String },

    #[error("invalid binding target '{nodeset}': {reason}")]
    InvalidTarget { nodeset: String, reason: String },

    #[error("record root '{found}' does not match form root '{expected}'")]
    RecordMismatch { expected: String, found: String },

    #[error("repeat '{nodeset}' has no template and no instance to derive one from")]
    MissingTemplate { nodeset: String },

    #[error(transparent)]
    Expression(#[from] trellis_expr::EvalError),
}

pub type Result<T> = std::result::Result<T, DefinitionError>;

impl DefinitionError {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_target(nodeset: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            nodeset: nodeset.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_template(nodeset: impl Into<String>) -> Self {
        Self::MissingTemplate {
            nodeset: nodeset.into(),
        }
    }
}

/// One declaration attached to a nodeset. Every expression is optional; a
/// declaration with none of them still carries `readonly` and `default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingDecl {
    pub nodeset: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculate: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,

    /// One-time default, evaluated once per node life while the node is
    /// still empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Direct edits are refused; calculations still write.
    #[serde(skip_serializing_if = "is_false")]
    pub readonly: bool,
}

/// A repeated group declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatDecl {
    pub nodeset: String,

    /// Dynamic instance-count expression, evaluated against the series'
    /// parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,

    /// Start with zero instances instead of the one-instance minimum.
    #[serde(skip_serializing_if = "is_false")]
    pub minimal: bool,

    /// Explicit clone template. Its values become clone defaults; without
    /// it the definition instance's first occurrence is cloned with values
    /// cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<DocNode>,
}

/// A select question fed by an itemset expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectDecl {
    pub nodeset: String,

    pub itemset: String,

    /// Space-separated multi selection instead of a single stored value.
    #[serde(skip_serializing_if = "is_false")]
    pub multiple: bool,
}

/// A complete parsed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDefinition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    /// The seed instance document.
    pub instance: DocNode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<BindingDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeats: Vec<RepeatDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selects: Vec<SelectDecl>,

    /// Named choice lists referenced by `items(...)` itemset expressions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub choices: HashMap<String, Vec<Choice>>,
}

impl FormDefinition {
    /// Parse and structurally validate a JSON form definition.
    pub fn from_json(raw: &str) -> Result<FormDefinition> {
        let definition: FormDefinition =
            serde_json::from_str(raw).map_err(|e| DefinitionError::parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<()> {
        if self.instance.name.is_empty() {
            return Err(DefinitionError::parse("instance root has no name"));
        }
        for nodeset in self.nodesets() {
            Path::new(nodeset)
                .map_err(|e| DefinitionError::invalid_target(nodeset, e.to_string()))?;
        }
        for decl in &self.repeats {
            let path = Path::new(&decl.nodeset)
                .map_err(|e| DefinitionError::invalid_target(&decl.nodeset, e.to_string()))?;
            if path.depth() < 2 {
                return Err(DefinitionError::invalid_target(
                    &decl.nodeset,
                    "the document root cannot repeat",
                ));
            }
        }
        for select in &self.selects {
            if select.itemset.trim().is_empty() {
                return Err(DefinitionError::invalid_target(
                    &select.nodeset,
                    "select has an empty itemset expression",
                ));
            }
        }
        Ok(())
    }

    fn nodesets(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .map(|b| b.nodeset.as_str())
            .chain(self.repeats.iter().map(|r| r.nodeset.as_str()))
            .chain(self.selects.iter().map(|s| s.nodeset.as_str()))
    }

    /// Every distinct path the definition's structure can produce: the
    /// instance document plus declared repeat templates.
    pub(crate) fn schema_paths(&self) -> HashSet<Path> {
        let mut out = HashSet::new();
        collect_doc_paths(&self.instance, Path::root(&self.instance.name), &mut out);
        for decl in &self.repeats {
            let Ok(path) = Path::new(&decl.nodeset) else {
                continue;
            };
            if let Some(template) = &decl.template {
                collect_doc_paths(template, path, &mut out);
            }
        }
        out
    }

    /// The clone template for one repeat series.
    pub(crate) fn derive_template(&self, decl: &RepeatDecl) -> Result<Node> {
        if let Some(doc) = &decl.template {
            return Ok(Node::from_doc(doc));
        }
        let path = Path::new(&decl.nodeset)
            .map_err(|e| DefinitionError::invalid_target(&decl.nodeset, e.to_string()))?;
        let names: Vec<&str> = path.steps().collect();
        let found = (names.first() == Some(&self.instance.name.as_str()))
            .then(|| self.instance.find(&names[1..]))
            .flatten();
        let Some(found) = found else {
            return Err(DefinitionError::missing_template(&decl.nodeset));
        };
        let mut node = Node::from_doc(found);
        node.clear_values();
        Ok(node)
    }
}

fn collect_doc_paths(doc: &DocNode, path: Path, out: &mut HashSet<Path>) {
    for child in &doc.children {
        collect_doc_paths(child, path.child(&child.name), out);
    }
    out.insert(path);
}

fn is_false(flag: &bool) -> bool {
    !*flag
}
