//! Authoritative record maps with sample → test-item reverse index
//!
//! [`IdentityMaps`] is not synchronized on its own; [`crate::SampleCache`]
//! guards it together with the projections under one lock.

use crate::types::{ItemId, Sample, SampleId, TestItem};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Sample and test-item records keyed by identity
#[derive(Debug, Default, Clone)]
pub struct IdentityMaps {
    samples: HashMap<SampleId, Sample>,
    items: HashMap<ItemId, TestItem>,

    /// Reverse index: sample -> items in arrival order
    by_sample: HashMap<SampleId, IndexSet<ItemId>>,
}

impl IdentityMaps {
    /// Create empty maps
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup sample
    #[inline]
    #[must_use]
    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(&id)
    }

    /// Lookup test item
    #[inline]
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&TestItem> {
        self.items.get(&id)
    }

    /// Items currently belonging to a sample
    ///
    /// `None` when neither the sample nor any item referencing it is loaded.
    #[inline]
    #[must_use]
    pub fn items_of(&self, id: SampleId) -> Option<&IndexSet<ItemId>> {
        self.by_sample.get(&id)
    }

    /// Whether a sample is loaded
    #[inline]
    #[must_use]
    pub fn contains_sample(&self, id: SampleId) -> bool {
        self.samples.contains_key(&id)
    }

    /// Whether a test item is loaded
    #[inline]
    #[must_use]
    pub fn contains_item(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    /// Number of samples
    #[inline]
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of test items, derived ones included
    #[inline]
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Number of measured (non-calculated) test items
    #[must_use]
    pub fn real_item_count(&self) -> usize {
        self.items.values().filter(|item| !item.is_calculated()).count()
    }

    /// Iterate all items
    pub fn items(&self) -> impl Iterator<Item = &TestItem> {
        self.items.values()
    }

    /// Iterate all samples
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }

    /// Iterate reverse index entries
    pub fn reverse_index(&self) -> impl Iterator<Item = (&SampleId, &IndexSet<ItemId>)> {
        self.by_sample.iter()
    }

    /// Insert or fully replace a sample
    ///
    /// Returns the previous record if one was replaced.
    pub fn put_sample(&mut self, sample: Sample) -> Option<Sample> {
        self.by_sample.entry(sample.id).or_default();
        self.samples.insert(sample.id, sample)
    }

    /// Remove a sample record
    ///
    /// Items still referencing it must be removed first; the reverse-index
    /// entry is dropped once it is empty.
    pub fn remove_sample(&mut self, id: SampleId) -> Option<Sample> {
        let removed = self.samples.remove(&id);
        if self.by_sample.get(&id).is_some_and(IndexSet::is_empty) {
            self.by_sample.remove(&id);
        }
        removed
    }

    /// Insert or fully replace a test item, keeping the reverse index in step
    ///
    /// Moving an item to another sample detaches it from the old entry.
    pub fn put_item(&mut self, item: TestItem) -> Option<TestItem> {
        let id = item.id;
        let owner = item.sample_id;
        let previous = self.items.insert(id, item);

        if let Some(prev) = &previous {
            if prev.sample_id != owner {
                self.detach(prev.sample_id, id);
            }
        }
        self.by_sample.entry(owner).or_default().insert(id);

        previous
    }

    /// Remove a test item and its reverse-index membership
    pub fn remove_item(&mut self, id: ItemId) -> Option<TestItem> {
        let removed = self.items.remove(&id)?;
        self.detach(removed.sample_id, id);
        Some(removed)
    }

    fn detach(&mut self, owner: SampleId, id: ItemId) {
        let now_empty = match self.by_sample.get_mut(&owner) {
            Some(set) => {
                set.shift_remove(&id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty && !self.samples.contains_key(&owner) {
            self.by_sample.remove(&owner);
        }
    }

    /// Rebuild the reverse index from the owner fields of every item
    ///
    /// `order` fixes the per-sample ordering; items missing from it are
    /// appended in id order.
    pub fn reconcile<'a>(&mut self, order: impl IntoIterator<Item = &'a ItemId>) {
        let mut rebuilt: HashMap<SampleId, IndexSet<ItemId>> =
            self.samples.keys().map(|id| (*id, IndexSet::new())).collect();

        for id in order {
            if let Some(item) = self.items.get(id) {
                rebuilt.entry(item.sample_id).or_default().insert(*id);
            }
        }

        let mut rest: Vec<&TestItem> = self
            .items
            .values()
            .filter(|item| {
                !rebuilt
                    .get(&item.sample_id)
                    .is_some_and(|set| set.contains(&item.id))
            })
            .collect();
        rest.sort_by_key(|item| item.id);
        for item in rest {
            rebuilt.entry(item.sample_id).or_default().insert(item.id);
        }

        self.by_sample = rebuilt;
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.samples.clear();
        self.items.clear();
        self.by_sample.clear();
    }
}
