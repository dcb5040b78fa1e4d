//! Evaluation port: value model, context, and the traits the engine and the
//! host implement.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_core::NodeRef;

/// Result of evaluating an expression.
///
/// Instance values are stored as strings; coercion between the variants
/// follows XPath conventions (see the `as_*` helpers).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value: an empty node, a reference with no match, or a failed
    /// numeric coercion.
    Empty,
    Boolean(bool),
    Number(f64),
    Text(String),
    /// An ordered option list, produced only by itemset expressions.
    Items(Vec<Choice>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Truthiness: empty and zero are false, non-empty strings are true.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
            Self::Items(items) => !items.is_empty(),
        }
    }

    /// Numeric coercion. `None` when the value has no numeric reading.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Items(_) => None,
        }
    }

    /// String rendering, used when writing results back into the instance.
    /// Whole numbers print without a fraction.
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Items(items) => items
                .iter()
                .map(|c| c.value.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Items(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// One selectable option of a choice list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub value: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    /// Filter attributes, matched by itemset expressions such as
    /// `items('cities', 'state', /data/state)`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl Choice {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("parse error in '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("bad arguments for {name}(): {reason}")]
    Arguments { name: String, reason: String },

    #[error("unknown choice list '{name}'")]
    UnknownChoiceList { name: String },

    #[error(transparent)]
    Reference(#[from] trellis_core::ModelError),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub fn parse(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    pub fn arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Arguments {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Read-only window onto the instance an expression runs against.
///
/// References are passed as written in the expression; the implementation
/// resolves them against the supplied context ref, so the same binding
/// expression sees a different slice of the tree in every repeat instance.
pub trait ModelView {
    /// Value of the first document-order match, `None` when nothing matches.
    fn value_of(&self, reference: &str, context: &NodeRef) -> Result<Option<String>>;

    /// Values of all matches, in document order.
    fn values_of(&self, reference: &str, context: &NodeRef) -> Result<Vec<String>>;

    /// Number of matches.
    fn count_of(&self, reference: &str, context: &NodeRef) -> Result<usize>;

    /// The first match as a concrete ref, `None` when nothing matches.
    fn resolve_first(&self, reference: &str, context: &NodeRef) -> Result<Option<NodeRef>>;

    /// A named choice list from the form definition.
    fn choice_list(&self, name: &str) -> Option<&[Choice]>;
}

/// Everything an evaluation needs: the context node plus the model window.
pub struct EvalContext<'a> {
    pub node: &'a NodeRef,
    pub model: &'a dyn ModelView,
}

impl<'a> EvalContext<'a> {
    pub fn new(node: &'a NodeRef, model: &'a dyn ModelView) -> Self {
        Self { node, model }
    }
}

/// The evaluation port the engine drives.
pub trait Evaluator {
    /// Evaluate `expr` with the given context node.
    fn evaluate(&self, expr: &str, ctx: &EvalContext<'_>) -> Result<Value>;

    /// The node references `expr` reads, exactly as written (relative
    /// references stay relative). Computed once per binding at registry
    /// build to seed the dependency cache.
    fn refs(&self, expr: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- coercion ----------------------------------------------------------

    #[test]
    fn truthiness() {
        assert!(!Value::Empty.as_bool());
        assert!(!Value::text("").as_bool());
        assert!(Value::text("no").as_bool());
        assert!(!Value::Number(0.0).as_bool());
        assert!(Value::Number(-1.5).as_bool());
        assert!(!Value::Number(f64::NAN).as_bool());
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::text(" 42 ").as_number(), Some(42.0));
        assert_eq!(Value::text("x").as_number(), None);
        assert_eq!(Value::Empty.as_number(), None);
        assert_eq!(Value::Boolean(true).as_number(), Some(1.0));
    }

    #[test]
    fn text_rendering() {
        assert_eq!(Value::Number(12.0).to_text(), "12");
        assert_eq!(Value::Number(2.5).to_text(), "2.5");
        assert_eq!(Value::Number(-0.0).to_text(), "0");
        assert_eq!(Value::Boolean(true).to_text(), "true");
        assert_eq!(Value::Empty.to_text(), "");
        let items = Value::Items(vec![Choice::new("a", "A"), Choice::new("b", "B")]);
        assert_eq!(items.to_text(), "a b");
    }

    // -- choices -----------------------------------------------------------

    #[test]
    fn choice_serde_skips_empty_attrs() {
        let c = Choice::new("nl", "Netherlands");
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("attrs"));

        let with = Choice::new("ams", "Amsterdam").with_attr("country", "nl");
        let json = serde_json::to_string(&with).unwrap();
        assert!(json.contains(r#""country":"nl""#));
    }
}
