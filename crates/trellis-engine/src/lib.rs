//! The reactive core of the trellis form engine.
//!
//! A [`Form`] binds a parsed [`FormDefinition`] to an instance tree and
//! keeps every derived fact current while the host edits: relevance,
//! calculated values, repeat cardinalities, option lists, and validation.
//! Hosts observe changes through a [`FormView`] and never poll.
//!
//! The engine is deliberately synchronous: every mutating call returns
//! only after propagation reached a fixed point, so a host reading back
//! any value sees a consistent document.

pub mod definition;
pub mod diagnostics;
pub mod validation;
pub mod view;

mod branch;
mod calculation;
mod depcache;
mod eval;
mod form;
mod itemset;
mod registry;
mod repeat;

pub use definition::{BindingDecl, DefinitionError, FormDefinition, RepeatDecl, SelectDecl};
pub use diagnostics::FormIssue;
pub use form::Form;
pub use validation::ValidationOutcome;
pub use view::{FormView, NullView, RecordingView, ViewEvent};
