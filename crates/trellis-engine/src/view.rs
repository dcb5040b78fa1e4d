//! The presentation port: how a host renders what the engine decides.

use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::{NodeRef, Relevance, SeriesRef};
use trellis_expr::Choice;

use crate::validation::ValidationOutcome;

/// Receives fine-grained notifications while the engine propagates.
///
/// Every method defaults to a no-op so hosts subscribe only to what they
/// render. Callbacks arrive mid-pump; implementations must not call back
/// into the form.
pub trait FormView {
    fn value_changed(&mut self, _node: &NodeRef, _value: &str) {}

    fn relevance_changed(&mut self, _node: &NodeRef, _relevance: Relevance) {}

    fn repeat_added(&mut self, _series: &SeriesRef, _ordinal: usize) {}

    fn repeat_removed(&mut self, _series: &SeriesRef, _ordinal: usize) {}

    /// A zero-count series under a relevant container: present but
    /// disabled.
    fn series_disabled(&mut self, _series: &SeriesRef, _disabled: bool) {}

    fn itemset_updated(&mut self, _node: &NodeRef, _options: &[Choice]) {}

    fn validation_changed(&mut self, _node: &NodeRef, _outcome: ValidationOutcome) {}

    fn readonly_changed(&mut self, _node: &NodeRef, _readonly: bool) {}
}

/// View that ignores everything. For headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl FormView for NullView {}

/// Lets a host keep a handle on its view while the form owns a clone.
impl<V: FormView> FormView for Rc<RefCell<V>> {
    fn value_changed(&mut self, node: &NodeRef, value: &str) {
        self.borrow_mut().value_changed(node, value);
    }

    fn relevance_changed(&mut self, node: &NodeRef, relevance: Relevance) {
        self.borrow_mut().relevance_changed(node, relevance);
    }

    fn repeat_added(&mut self, series: &SeriesRef, ordinal: usize) {
        self.borrow_mut().repeat_added(series, ordinal);
    }

    fn repeat_removed(&mut self, series: &SeriesRef, ordinal: usize) {
        self.borrow_mut().repeat_removed(series, ordinal);
    }

    fn series_disabled(&mut self, series: &SeriesRef, disabled: bool) {
        self.borrow_mut().series_disabled(series, disabled);
    }

    fn itemset_updated(&mut self, node: &NodeRef, options: &[Choice]) {
        self.borrow_mut().itemset_updated(node, options);
    }

    fn validation_changed(&mut self, node: &NodeRef, outcome: ValidationOutcome) {
        self.borrow_mut().validation_changed(node, outcome);
    }

    fn readonly_changed(&mut self, node: &NodeRef, readonly: bool) {
        self.borrow_mut().readonly_changed(node, readonly);
    }
}

/// One captured notification, with refs flattened to display strings for
/// easy assertion and printing.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Value { node: String, value: String },
    Relevance { node: String, relevance: Relevance },
    RepeatAdded { series: String, ordinal: usize },
    RepeatRemoved { series: String, ordinal: usize },
    SeriesDisabled { series: String, disabled: bool },
    Itemset { node: String, values: Vec<String> },
    Validation { node: String, outcome: ValidationOutcome },
    Readonly { node: String, readonly: bool },
}

/// Captures every notification in order. The engine's tests and the CLI's
/// trace output both run on it.
#[derive(Debug, Default)]
pub struct RecordingView {
    events: Vec<ViewEvent>,
}

impl RecordingView {
    pub fn events(&self) -> &[ViewEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl FormView for RecordingView {
    fn value_changed(&mut self, node: &NodeRef, value: &str) {
        self.events.push(ViewEvent::Value {
            node: node.to_string(),
            value: value.to_string(),
        });
    }

    fn relevance_changed(&mut self, node: &NodeRef, relevance: Relevance) {
        self.events.push(ViewEvent::Relevance {
            node: node.to_string(),
            relevance,
        });
    }

    fn repeat_added(&mut self, series: &SeriesRef, ordinal: usize) {
        self.events.push(ViewEvent::RepeatAdded {
            series: series.to_string(),
            ordinal,
        });
    }

    fn repeat_removed(&mut self, series: &SeriesRef, ordinal: usize) {
        self.events.push(ViewEvent::RepeatRemoved {
            series: series.to_string(),
            ordinal,
        });
    }

    fn series_disabled(&mut self, series: &SeriesRef, disabled: bool) {
        self.events.push(ViewEvent::SeriesDisabled {
            series: series.to_string(),
            disabled,
        });
    }

    fn itemset_updated(&mut self, node: &NodeRef, options: &[Choice]) {
        self.events.push(ViewEvent::Itemset {
            node: node.to_string(),
            values: options.iter().map(|c| c.value.clone()).collect(),
        });
    }

    fn validation_changed(&mut self, node: &NodeRef, outcome: ValidationOutcome) {
        self.events.push(ViewEvent::Validation {
            node: node.to_string(),
            outcome,
        });
    }

    fn readonly_changed(&mut self, node: &NodeRef, readonly: bool) {
        self.events.push(ViewEvent::Readonly {
            node: node.to_string(),
            readonly,
        });
    }
}
