//! Instance tree and addressing types for the trellis form engine.
//!
//! This crate owns the hierarchical data document a form is bound to: the
//! node model, path and node-ref addressing, the mutable tree with repeat
//! instance lifecycle, and the serialized document format.

pub mod doc;
pub mod error;
pub mod event;
pub mod node;
pub mod noderef;
pub mod path;
pub mod tree;

pub use doc::DocNode;
pub use error::{ModelError, Result};
pub use event::ModelEvent;
pub use node::{Node, Relevance};
pub use noderef::{NodeRef, RefPattern, SeriesRef, Step};
pub use path::Path;
pub use tree::{InstanceTree, SerializeOptions};
