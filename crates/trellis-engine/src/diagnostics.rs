//! Non-fatal problems collected while a form is built and run.

use std::fmt;

use serde::Serialize;
use trellis_core::Path;

/// A defect the engine noticed and recovered from.
///
/// Issues never abort propagation; they accumulate on the form and are
/// available through [`Form::diagnostics`](crate::Form::diagnostics).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormIssue {
    /// An expression failed to evaluate. The computation it belongs to kept
    /// its previous result.
    Evaluation {
        target: Path,
        expr: String,
        reason: String,
    },

    /// Calculations feed each other in a loop, found either while ordering
    /// them at build or by the re-entry guard at runtime. The participating
    /// bindings are disabled for the rest of the session.
    CyclicDependency { targets: Vec<Path> },

    /// A declaration or record addresses a node the instance structure does
    /// not contain.
    StructuralReference { target: Path, reference: String },
}

impl FormIssue {
    pub(crate) fn evaluation(target: &Path, expr: &str, reason: impl fmt::Display) -> Self {
        Self::Evaluation {
            target: target.clone(),
            expr: expr.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn cycle(targets: Vec<Path>) -> Self {
        Self::CyclicDependency { targets }
    }

    pub(crate) fn structural(target: &Path, reference: &str) -> Self {
        Self::StructuralReference {
            target: target.clone(),
            reference: reference.to_string(),
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CyclicDependency { .. })
    }
}

impl fmt::Display for FormIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluation {
                target,
                expr,
                reason,
            } => {
                write!(f, "cannot evaluate '{expr}' for {target}: {reason}")
            }
            Self::CyclicDependency { targets } => {
                write!(f, "calculation cycle:")?;
                for target in targets {
                    write!(f, " {target}")?;
                }
                Ok(())
            }
            Self::StructuralReference { target, reference } => {
                write!(f, "{target} references missing node '{reference}'")
            }
        }
    }
}
