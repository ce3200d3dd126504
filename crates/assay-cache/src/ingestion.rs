//! Update ingestion
//!
//! Applies pushed add/modify/delete batches to the locked cache state.
//! A batch is applied in three phases so every row range it reports is
//! meaningful:
//! 1. removals, with rows numbered before anything moved
//! 2. inserts and overwrites, appending new rows at the end
//! 3. event construction against the final numbering
//!
//! Sample records carry their full item membership. The difference between
//! that membership and the reverse index is computed here, for the whole
//! batch at once, so an item that leaves one sample and joins another in
//! the same batch is moved rather than deleted and re-added.

use crate::cache::{CacheState, Readiness};
use crate::events::{CacheEvent, ChangeKind, RowRange};
use crate::projection::{contiguous_ranges, RowKey, ViewMode};
use crate::types::{ItemId, Sample, SampleId, SampleRecord, TestItem};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Kind of pushed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// New records
    Add,
    /// Full replacement of existing records
    Modify,
    /// Records removed upstream
    Delete,
}

/// Batch delivered on the sample channel
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Notification kind
    pub kind: UpdateKind,
    /// Changed samples with their complete item membership
    pub records: Vec<SampleRecord>,
}

impl SampleBatch {
    /// Create batch
    #[inline]
    #[must_use]
    pub fn new(kind: UpdateKind, records: Vec<SampleRecord>) -> Self {
        Self { kind, records }
    }

    /// Check if batch carries no records
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Batch delivered on the test-item channel
#[derive(Debug, Clone, PartialEq)]
pub struct ItemBatch {
    /// Notification kind
    pub kind: UpdateKind,
    /// Changed items
    pub items: Vec<TestItem>,
}

impl ItemBatch {
    /// Create batch
    #[inline]
    #[must_use]
    pub fn new(kind: UpdateKind, items: Vec<TestItem>) -> Self {
        Self { kind, items }
    }

    /// Check if batch carries no items
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What one batch did, collected while it runs
#[derive(Debug, Default)]
struct ChangeLog {
    removed_sample_rows: Vec<usize>,
    removed_item_rows: Vec<usize>,
    added: Vec<RowKey>,
    touched: BTreeSet<RowKey>,
    samples: BTreeSet<SampleId>,
    items: BTreeSet<ItemId>,
}

impl ChangeLog {
    fn structural(&self) -> bool {
        !self.removed_sample_rows.is_empty()
            || !self.removed_item_rows.is_empty()
            || !self.added.is_empty()
    }

    fn is_empty(&self) -> bool {
        !self.structural()
            && self.touched.is_empty()
            && self.samples.is_empty()
            && self.items.is_empty()
    }
}

impl CacheState {
    pub(crate) fn apply_sample_batch(
        &mut self,
        batch: SampleBatch,
        now: DateTime<Utc>,
    ) -> Vec<CacheEvent> {
        let mut log = ChangeLog::default();
        match batch.kind {
            UpdateKind::Delete => {
                let ids: Vec<SampleId> = batch.records.iter().map(SampleRecord::id).collect();
                self.delete_samples(&ids, &mut log);
            }
            UpdateKind::Add | UpdateKind::Modify => {
                self.upsert_samples(batch.kind, batch.records, now, &mut log);
            }
        }
        self.finish(log)
    }

    pub(crate) fn apply_item_batch(&mut self, batch: ItemBatch, now: DateTime<Utc>) -> Vec<CacheEvent> {
        let mut log = ChangeLog::default();
        match batch.kind {
            UpdateKind::Delete => {
                let ids: Vec<ItemId> = batch.items.iter().map(|item| item.id).collect();
                self.remove_items(&ids, &mut log);
            }
            UpdateKind::Add | UpdateKind::Modify => {
                for item in batch.items {
                    let known = self.maps.contains_item(item.id);
                    match (batch.kind, known) {
                        (UpdateKind::Modify, false) => {
                            tracing::warn!("Modify for unknown item {}; inserting", item.id);
                        }
                        (UpdateKind::Add, true) => {
                            tracing::debug!("Add for known item {}; replacing", item.id);
                        }
                        _ => {}
                    }
                    if !self.maps.contains_sample(item.sample_id) {
                        tracing::debug!("Item {} references unloaded {}", item.id, item.sample_id);
                    }
                    self.upsert_item(item, now, &mut log);
                }
            }
        }
        self.finish(log)
    }

    pub(crate) fn load_snapshot(
        &mut self,
        samples: Vec<Sample>,
        items: Vec<TestItem>,
        now: DateTime<Utc>,
    ) -> Vec<CacheEvent> {
        let view = self.active_view;
        let old_rows = self.row_count(view);
        let mut changed_samples: BTreeSet<SampleId> = self.sample_rows.iter().copied().collect();
        let mut changed_items: BTreeSet<ItemId> = self.item_rows.iter().copied().collect();

        self.maps.clear();
        self.sample_rows.clear();
        self.item_rows.clear();
        self.selection.clear(ViewMode::Sample);
        self.selection.clear(ViewMode::TestItem);
        self.countdowns.clear();
        self.cursor = None;

        for sample in samples {
            let id = sample.id;
            if self.maps.put_sample(sample).is_some() {
                tracing::warn!("Snapshot contains {} twice; keeping the later record", id);
            }
            self.sample_rows.append(id);
            changed_samples.insert(id);
        }
        for item in items {
            let id = item.id;
            self.sync_countdown(&item, now);
            if self.maps.put_item(item).is_some() {
                tracing::warn!("Snapshot contains {} twice; keeping the later record", id);
            }
            self.item_rows.append(id);
            changed_items.insert(id);
        }
        let order: Vec<ItemId> = self.item_rows.iter().copied().collect();
        self.maps.reconcile(&order);

        self.generation += 1;
        let generation = self.generation;
        let new_rows = self.row_count(view);

        let mut events = Vec::new();
        if old_rows > 0 {
            events.push(CacheEvent::Rows(RowRange {
                kind: ChangeKind::Delete,
                view,
                first: 0,
                last: old_rows - 1,
                generation,
            }));
        }
        if new_rows > 0 {
            events.push(CacheEvent::Rows(RowRange {
                kind: ChangeKind::Add,
                view,
                first: 0,
                last: new_rows - 1,
                generation,
            }));
        }
        if !changed_samples.is_empty() || !changed_items.is_empty() {
            events.push(CacheEvent::RecordsChanged {
                samples: changed_samples,
                items: changed_items,
            });
        }
        if self.readiness != Readiness::Ready {
            self.readiness = Readiness::Ready;
            events.push(CacheEvent::ReadinessChanged(Readiness::Ready));
        }
        events
    }

    fn upsert_samples(
        &mut self,
        kind: UpdateKind,
        records: Vec<SampleRecord>,
        now: DateTime<Utc>,
        log: &mut ChangeLog,
    ) {
        // Later records for the same sample win
        let mut latest: IndexMap<SampleId, SampleRecord> = IndexMap::new();
        for record in records {
            latest.insert(record.id(), record);
        }

        let incoming: HashSet<ItemId> = latest
            .values()
            .flat_map(|record| record.items.iter().map(|item| item.id))
            .collect();
        let mut dropped: Vec<ItemId> = Vec::new();
        for id in latest.keys() {
            if let Some(current) = self.maps.items_of(*id) {
                dropped.extend(current.iter().filter(|item| !incoming.contains(item)).copied());
            }
        }
        self.remove_items(&dropped, log);

        for (id, record) in latest {
            let SampleRecord { sample, items } = record;
            let known = self.maps.contains_sample(id);
            match (kind, known) {
                (UpdateKind::Modify, false) => {
                    tracing::warn!("Modify for unknown sample {}; inserting", id);
                }
                (UpdateKind::Add, true) => {
                    tracing::debug!("Add for known sample {}; replacing", id);
                }
                _ => {}
            }

            self.maps.put_sample(sample);
            log.samples.insert(id);
            if self.sample_rows.contains(&id) {
                log.touched.insert(RowKey::Sample(id));
                // item rows display sample columns too
                if let Some(current) = self.maps.items_of(id) {
                    log.touched.extend(current.iter().copied().map(RowKey::Item));
                }
            } else {
                self.sample_rows.append(id);
                log.added.push(RowKey::Sample(id));
            }

            for mut item in items {
                if item.sample_id != id {
                    tracing::debug!(
                        "Item {} listed under {} but owned by {}; using {}",
                        item.id,
                        id,
                        item.sample_id,
                        id
                    );
                    item.sample_id = id;
                }
                self.upsert_item(item, now, log);
            }
        }
    }

    fn upsert_item(&mut self, item: TestItem, now: DateTime<Utc>, log: &mut ChangeLog) {
        let id = item.id;
        let owner = item.sample_id;
        let previous_owner = self.maps.item(id).map(|prev| prev.sample_id);

        self.sync_countdown(&item, now);
        self.maps.put_item(item);

        if self.item_rows.contains(&id) {
            log.touched.insert(RowKey::Item(id));
        } else {
            self.item_rows.append(id);
            log.added.push(RowKey::Item(id));
        }
        log.items.insert(id);
        log.touched.insert(RowKey::Sample(owner));
        if let Some(prev) = previous_owner.filter(|prev| *prev != owner) {
            log.touched.insert(RowKey::Sample(prev));
        }
    }

    fn sync_countdown(&mut self, item: &TestItem, now: DateTime<Utc>) {
        match item.reaction_started_at {
            Some(started_at) if self.countdown_enabled && item.countdown_eligible() => {
                self.countdowns
                    .track(item.id, started_at, item.needed_reaction_secs, now);
            }
            _ => {
                self.countdowns.untrack(item.id);
            }
        }
    }

    fn delete_samples(&mut self, ids: &[SampleId], log: &mut ChangeLog) {
        let mut items: Vec<ItemId> = Vec::new();
        for id in ids {
            match self.maps.items_of(*id) {
                Some(set) => items.extend(set.iter().copied()),
                None => tracing::debug!("Delete for unknown sample {}; ignoring", id),
            }
        }
        self.remove_items(&items, log);
        self.remove_samples(ids, log);
    }

    /// Must run at most once per batch: rows are taken before any removal
    fn remove_items(&mut self, ids: &[ItemId], log: &mut ChangeLog) {
        let mut seen = HashSet::new();
        let unique: Vec<ItemId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        log.removed_item_rows
            .extend(unique.iter().filter_map(|id| self.item_rows.row_of(id)));

        for id in unique {
            if let Some(item) = self.maps.remove_item(id) {
                log.items.insert(id);
                log.touched.insert(RowKey::Sample(item.sample_id));
            }
            self.item_rows.remove(&id);
            self.selection.forget(RowKey::Item(id));
            self.countdowns.untrack(id);
            if self.cursor == Some(RowKey::Item(id)) {
                self.cursor = None;
            }
        }
    }

    /// Must run at most once per batch: rows are taken before any removal
    fn remove_samples(&mut self, ids: &[SampleId], log: &mut ChangeLog) {
        let mut seen = HashSet::new();
        let unique: Vec<SampleId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        log.removed_sample_rows
            .extend(unique.iter().filter_map(|id| self.sample_rows.row_of(id)));

        for id in unique {
            if self.maps.remove_sample(id).is_some() {
                log.samples.insert(id);
            }
            self.sample_rows.remove(&id);
            self.selection.forget(RowKey::Sample(id));
            if self.cursor == Some(RowKey::Sample(id)) {
                self.cursor = None;
            }
        }
    }

    fn finish(&mut self, log: ChangeLog) -> Vec<CacheEvent> {
        if log.is_empty() {
            return Vec::new();
        }
        if log.structural() {
            self.generation += 1;
        }
        let generation = self.generation;
        let view = self.active_view;
        let mut events = Vec::new();

        let removed = match view {
            ViewMode::Sample => &log.removed_sample_rows,
            ViewMode::TestItem => &log.removed_item_rows,
        };
        for (first, last) in contiguous_ranges(removed.iter().copied()).into_iter().rev() {
            events.push(CacheEvent::Rows(RowRange {
                kind: ChangeKind::Delete,
                view,
                first,
                last,
                generation,
            }));
        }

        let added: HashSet<RowKey> = log.added.iter().copied().collect();
        let added_rows = log
            .added
            .iter()
            .filter(|key| key.view() == view)
            .filter_map(|key| self.row_of(*key));
        for (first, last) in contiguous_ranges(added_rows) {
            events.push(CacheEvent::Rows(RowRange {
                kind: ChangeKind::Add,
                view,
                first,
                last,
                generation,
            }));
        }

        let modified_rows = log
            .touched
            .iter()
            .filter(|key| key.view() == view && !added.contains(key))
            .filter_map(|key| self.row_of(*key));
        for (first, last) in contiguous_ranges(modified_rows) {
            events.push(CacheEvent::Rows(RowRange {
                kind: ChangeKind::Modify,
                view,
                first,
                last,
                generation,
            }));
        }

        if !log.samples.is_empty() || !log.items.is_empty() {
            events.push(CacheEvent::RecordsChanged {
                samples: log.samples,
                items: log.items,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::types::TestStatus;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn item(id: i64, sample: i64) -> TestItem {
        TestItem::new(ItemId(id), SampleId(sample), 1)
    }

    fn record(sample: i64, items: &[i64]) -> SampleRecord {
        SampleRecord::new(
            Sample::new(SampleId(sample)),
            items.iter().map(|id| item(*id, sample)).collect(),
        )
    }

    fn state() -> CacheState {
        CacheState::new(&CacheConfig::default())
    }

    fn rows(events: &[CacheEvent]) -> Vec<(ChangeKind, usize, usize)> {
        events
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Rows(r) => Some((r.kind, r.first, r.last)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_batch_is_noop() {
        let mut state = state();
        let events = state.apply_sample_batch(SampleBatch::new(UpdateKind::Add, Vec::new()), t0());
        assert!(events.is_empty());
        assert_eq!(state.generation, 0);
    }

    #[test]
    fn add_reports_appended_range() {
        let mut state = state();
        state.apply_sample_batch(SampleBatch::new(UpdateKind::Add, vec![record(1, &[10])]), t0());
        let events = state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Add, vec![record(2, &[20]), record(3, &[30])]),
            t0(),
        );
        assert_eq!(rows(&events), vec![(ChangeKind::Add, 1, 2)]);
        assert_eq!(state.generation, 2);
    }

    #[test]
    fn delete_reports_pre_batch_rows_highest_first() {
        let mut state = state();
        state.apply_sample_batch(
            SampleBatch::new(
                UpdateKind::Add,
                (1..=5).map(|id| record(id, &[])).collect(),
            ),
            t0(),
        );
        let events = state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Delete, vec![record(2, &[]), record(4, &[]), record(5, &[])]),
            t0(),
        );
        assert_eq!(
            rows(&events),
            vec![(ChangeKind::Delete, 3, 4), (ChangeKind::Delete, 1, 1)]
        );
        assert_eq!(state.sample_rows.len(), 2);
    }

    #[test]
    fn modify_diffs_membership_both_ways() {
        let mut state = state();
        state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Add, vec![record(1, &[10, 11, 12])]),
            t0(),
        );
        state.active_view = ViewMode::TestItem;

        let events = state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Modify, vec![record(1, &[10, 12, 13])]),
            t0(),
        );

        let members: Vec<_> = state.maps.items_of(SampleId(1)).unwrap().iter().copied().collect();
        assert_eq!(members, vec![ItemId(10), ItemId(12), ItemId(13)]);
        assert!(state.maps.item(ItemId(11)).is_none());
        assert_eq!(
            rows(&events),
            vec![
                (ChangeKind::Delete, 1, 1),
                (ChangeKind::Add, 2, 2),
                (ChangeKind::Modify, 0, 1),
            ]
        );
        assert!(state.check_consistency().is_ok());
    }

    #[test]
    fn item_moving_between_samples_in_one_batch_keeps_row() {
        let mut state = state();
        state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Add, vec![record(1, &[10, 11]), record(2, &[20])]),
            t0(),
        );
        let row_before = state.item_rows.row_of(&ItemId(11));

        state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Modify, vec![record(1, &[10]), record(2, &[20, 11])]),
            t0(),
        );

        assert_eq!(state.item_rows.row_of(&ItemId(11)), row_before);
        assert_eq!(state.maps.item(ItemId(11)).map(|i| i.sample_id), Some(SampleId(2)));
        assert!(!state.maps.items_of(SampleId(1)).unwrap().contains(&ItemId(11)));
        assert!(state.check_consistency().is_ok());
    }

    #[test]
    fn modify_of_unknown_sample_inserts() {
        let mut state = state();
        let events = state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Modify, vec![record(7, &[70])]),
            t0(),
        );
        assert!(state.maps.contains_sample(SampleId(7)));
        assert_eq!(rows(&events), vec![(ChangeKind::Add, 0, 0)]);
    }

    #[test]
    fn duplicate_records_in_batch_last_wins() {
        let mut state = state();
        state.apply_sample_batch(
            SampleBatch::new(UpdateKind::Add, vec![record(1, &[10]), record(1, &[11])]),
            t0(),
        );
        assert_eq!(state.sample_rows.len(), 1);
        assert!(state.maps.contains_item(ItemId(11)));
        assert!(!state.maps.contains_item(ItemId(10)));
    }

    #[test]
    fn status_transition_drives_countdown() {
        let mut state = state();
        let testing = item(10, 1)
            .with_status(TestStatus::Testing)
            .with_reaction(t0(), 60);
        state.apply_item_batch(ItemBatch::new(UpdateKind::Add, vec![testing.clone()]), t0());
        assert_eq!(state.countdowns.remaining(ItemId(10)), Some(60));

        let done = testing.with_status(TestStatus::Tested);
        state.apply_item_batch(
            ItemBatch::new(UpdateKind::Modify, vec![done]),
            t0() + TimeDelta::seconds(61),
        );
        assert_eq!(state.countdowns.remaining(ItemId(10)), None);
    }

    #[test]
    fn disabled_countdowns_never_track() {
        let mut state = CacheState::new(&CacheConfig::default().with_countdown(false));
        let testing = item(10, 1)
            .with_status(TestStatus::Testing)
            .with_reaction(t0(), 60);
        state.apply_item_batch(ItemBatch::new(UpdateKind::Add, vec![testing]), t0());
        assert!(state.countdowns.is_empty());
    }

    #[test]
    fn item_delete_clears_selection_and_cursor() {
        let mut state = state();
        state.apply_item_batch(ItemBatch::new(UpdateKind::Add, vec![item(10, 1), item(11, 1)]), t0());
        state.selection.set(RowKey::Item(ItemId(10)), true);
        state.cursor = Some(RowKey::Item(ItemId(10)));

        state.apply_item_batch(ItemBatch::new(UpdateKind::Delete, vec![item(10, 1)]), t0());

        assert!(state.selection.selected(ViewMode::TestItem).is_empty());
        assert_eq!(state.cursor, None);
        assert!(state.check_consistency().is_ok());
    }

    #[test]
    fn snapshot_replaces_content() {
        let mut state = state();
        state.apply_sample_batch(SampleBatch::new(UpdateKind::Add, vec![record(9, &[90])]), t0());

        let events = state.load_snapshot(
            vec![Sample::new(SampleId(1)), Sample::new(SampleId(2))],
            vec![item(10, 1), item(20, 2), item(11, 1)],
            t0(),
        );

        assert!(!state.maps.contains_sample(SampleId(9)));
        let members: Vec<_> = state.maps.items_of(SampleId(1)).unwrap().iter().copied().collect();
        assert_eq!(members, vec![ItemId(10), ItemId(11)]);
        assert_eq!(
            rows(&events),
            vec![(ChangeKind::Delete, 0, 0), (ChangeKind::Add, 0, 1)]
        );
        assert_eq!(state.readiness, Readiness::Ready);
        assert!(state.check_consistency().is_ok());
    }
}
