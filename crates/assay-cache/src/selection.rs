//! Per-view row selection keyed by identity
//!
//! Rows are resolved to ids by the caller at the moment of the toggle, so
//! later inserts and deletes elsewhere never move a selection onto an
//! unrelated row.

use crate::projection::{RowKey, ViewMode};
use crate::types::{ItemId, SampleId};
use std::collections::{BTreeSet, HashSet};

/// Two independent selection sets, one per view
#[derive(Debug, Default, Clone)]
pub struct SelectionTracker {
    samples: HashSet<SampleId>,
    items: HashSet<ItemId>,
}

impl SelectionTracker {
    /// Create tracker with nothing selected
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set selection state of one id; returns whether it changed
    pub fn set(&mut self, key: RowKey, selected: bool) -> bool {
        match (key, selected) {
            (RowKey::Sample(id), true) => self.samples.insert(id),
            (RowKey::Sample(id), false) => self.samples.remove(&id),
            (RowKey::Item(id), true) => self.items.insert(id),
            (RowKey::Item(id), false) => self.items.remove(&id),
        }
    }

    /// Whether an id is selected
    #[inline]
    #[must_use]
    pub fn contains(&self, key: RowKey) -> bool {
        match key {
            RowKey::Sample(id) => self.samples.contains(&id),
            RowKey::Item(id) => self.items.contains(&id),
        }
    }

    /// Replace the selection of a view wholesale
    pub fn replace(&mut self, view: ViewMode, keys: impl IntoIterator<Item = RowKey>) {
        self.clear(view);
        for key in keys {
            if key.view() == view {
                self.set(key, true);
            }
        }
    }

    /// Clear one view; returns the ids that were selected
    pub fn clear(&mut self, view: ViewMode) -> Vec<RowKey> {
        match view {
            ViewMode::Sample => self.samples.drain().map(RowKey::Sample).collect(),
            ViewMode::TestItem => self.items.drain().map(RowKey::Item).collect(),
        }
    }

    /// Selected ids of one view
    #[must_use]
    pub fn selected(&self, view: ViewMode) -> BTreeSet<RowKey> {
        match view {
            ViewMode::Sample => self.samples.iter().copied().map(RowKey::Sample).collect(),
            ViewMode::TestItem => self.items.iter().copied().map(RowKey::Item).collect(),
        }
    }

    /// Number of selected ids in one view
    #[inline]
    #[must_use]
    pub fn count(&self, view: ViewMode) -> usize {
        match view {
            ViewMode::Sample => self.samples.len(),
            ViewMode::TestItem => self.items.len(),
        }
    }

    /// Drop an id that no longer exists
    #[inline]
    pub fn forget(&mut self, key: RowKey) {
        self.set(key, false);
    }
}
