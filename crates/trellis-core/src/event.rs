//! Change notifications emitted by the instance tree.

use crate::noderef::{NodeRef, SeriesRef};

/// One observable mutation of the instance tree.
///
/// The tree buffers these as mutations land; the engine drains the buffer
/// after each mutation and feeds the events through its propagation queue
/// until no further mutations occur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A node's value changed.
    ValueChanged { node: NodeRef },

    /// A repeat instance was inserted at `ordinal` (1-based). `shifted`
    /// lists the new ordinals of pre-existing instances that moved up.
    InstanceAdded {
        series: SeriesRef,
        ordinal: usize,
        shifted: Vec<usize>,
    },

    /// A repeat instance was removed. `shifted` lists the new ordinals of
    /// instances renumbered down to close the gap.
    InstanceRemoved {
        series: SeriesRef,
        ordinal: usize,
        shifted: Vec<usize>,
    },
}

impl ModelEvent {
    /// The ref whose subtree this event concerns.
    pub fn origin(&self) -> NodeRef {
        match self {
            Self::ValueChanged { node } => node.clone(),
            Self::InstanceAdded {
                series, ordinal, ..
            } => series.instance(*ordinal),
            Self::InstanceRemoved { series, .. } => series.parent.clone(),
        }
    }
}
