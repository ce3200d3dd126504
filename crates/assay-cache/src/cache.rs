//! Shared sample cache handle
//!
//! [`SampleCache`] owns one [`parking_lot::RwLock`] over every structure the
//! console reads: record maps, reverse index, both projections, selection,
//! countdowns and the cursor. Each public operation takes the lock once and
//! runs to completion, so a reader never observes half of a batch.
//!
//! Multi-value reads that must agree with each other (rendering one frame)
//! go through [`SampleCache::read`], which holds the read lock for the
//! lifetime of the returned [`CacheReader`].

use crate::config::CacheConfig;
use crate::countdown::{Clock, CountdownRegistry, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, ChangeKind, EventBus, RowRange};
use crate::identity::IdentityMaps;
use crate::ingestion::{ItemBatch, SampleBatch};
use crate::projection::{contiguous_ranges, OrdinalProjection, RowKey, ViewMode};
use crate::selection::SelectionTracker;
use crate::types::{ItemId, Sample, SampleId, TestItem};
use crossbeam::channel::Receiver;
use indexmap::IndexSet;
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Load state of the cache, reported separately from its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Readiness {
    /// Nothing fetched yet
    #[default]
    Unloaded,
    /// Bulk load in progress
    Loading,
    /// Bulk load completed
    Ready,
    /// Bulk load failed; content may be empty or partial
    Failed,
}

/// Row number pinned to the structural generation it was read at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    /// View the row belongs to
    pub view: ViewMode,
    /// Row number
    pub row: usize,
    /// Generation when the row was read
    pub generation: u64,
}

/// Everything guarded by the cache lock
#[derive(Debug)]
pub(crate) struct CacheState {
    pub(crate) maps: IdentityMaps,
    pub(crate) sample_rows: OrdinalProjection<SampleId>,
    pub(crate) item_rows: OrdinalProjection<ItemId>,
    pub(crate) selection: SelectionTracker,
    pub(crate) countdowns: CountdownRegistry,
    pub(crate) active_view: ViewMode,
    pub(crate) cursor: Option<RowKey>,
    /// Bumped by every batch that adds or removes rows
    pub(crate) generation: u64,
    pub(crate) display_epoch: u64,
    pub(crate) readiness: Readiness,
    pub(crate) countdown_enabled: bool,
}

impl CacheState {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        Self {
            maps: IdentityMaps::new(),
            sample_rows: OrdinalProjection::new(),
            item_rows: OrdinalProjection::new(),
            selection: SelectionTracker::new(),
            countdowns: CountdownRegistry::new(),
            active_view: config.initial_view,
            cursor: None,
            generation: 0,
            display_epoch: 0,
            readiness: Readiness::Unloaded,
            countdown_enabled: config.countdown.enabled,
        }
    }

    pub(crate) fn row_of(&self, key: RowKey) -> Option<usize> {
        match key {
            RowKey::Sample(id) => self.sample_rows.row_of(&id),
            RowKey::Item(id) => self.item_rows.row_of(&id),
        }
    }

    pub(crate) fn key_at(&self, view: ViewMode, row: usize) -> Option<RowKey> {
        match view {
            ViewMode::Sample => self.sample_rows.id_at(row).map(RowKey::Sample),
            ViewMode::TestItem => self.item_rows.id_at(row).map(RowKey::Item),
        }
    }

    pub(crate) fn row_count(&self, view: ViewMode) -> usize {
        match view {
            ViewMode::Sample => self.sample_rows.len(),
            ViewMode::TestItem => self.item_rows.len(),
        }
    }

    /// Same underlying sample in the other view
    ///
    /// A sample maps to its item with the lowest row; an item maps to its
    /// owning sample.
    pub(crate) fn counterpart(&self, key: RowKey) -> Option<RowKey> {
        match key {
            RowKey::Sample(id) => self
                .maps
                .items_of(id)?
                .iter()
                .filter_map(|item| self.item_rows.row_of(item).map(|row| (row, *item)))
                .min_by_key(|(row, _)| *row)
                .map(|(_, item)| RowKey::Item(item)),
            RowKey::Item(id) => {
                let owner = self.maps.item(id)?.sample_id;
                self.sample_rows
                    .contains(&owner)
                    .then_some(RowKey::Sample(owner))
            }
        }
    }

    fn exists(&self, key: RowKey) -> bool {
        match key {
            RowKey::Sample(id) => self.maps.contains_sample(id),
            RowKey::Item(id) => self.maps.contains_item(id),
        }
    }

    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        if self.sample_rows.len() != self.maps.sample_count() {
            return Err(format!(
                "sample rows {} != samples {}",
                self.sample_rows.len(),
                self.maps.sample_count()
            ));
        }
        if self.item_rows.len() != self.maps.item_count() {
            return Err(format!(
                "item rows {} != items {}",
                self.item_rows.len(),
                self.maps.item_count()
            ));
        }
        if let Some(id) = self.sample_rows.iter().find(|id| !self.maps.contains_sample(**id)) {
            return Err(format!("sample row without record: {id}"));
        }
        if let Some(id) = self.item_rows.iter().find(|id| !self.maps.contains_item(**id)) {
            return Err(format!("item row without record: {id}"));
        }

        for item in self.maps.items() {
            let indexed = self
                .maps
                .items_of(item.sample_id)
                .is_some_and(|set| set.contains(&item.id));
            if !indexed {
                return Err(format!("{} missing from index of {}", item.id, item.sample_id));
            }
        }
        for (sample, set) in self.maps.reverse_index() {
            for id in set {
                match self.maps.item(*id) {
                    Some(item) if item.sample_id == *sample => {}
                    Some(item) => {
                        return Err(format!(
                            "{id} indexed under {sample} but owned by {}",
                            item.sample_id
                        ))
                    }
                    None => return Err(format!("{id} indexed under {sample} but not loaded")),
                }
            }
            if set.is_empty() && !self.maps.contains_sample(*sample) {
                return Err(format!("empty index entry for unloaded {sample}"));
            }
        }

        if let Some(id) = self.countdowns.ids().find(|id| !self.maps.contains_item(**id)) {
            return Err(format!("countdown for unloaded {id}"));
        }
        for view in [ViewMode::Sample, ViewMode::TestItem] {
            if let Some(key) = self.selection.selected(view).into_iter().find(|k| !self.exists(*k)) {
                return Err(format!("selection of unloaded {key}"));
            }
        }
        Ok(())
    }
}

/// Consistent read view, holding the read lock until dropped
///
/// Do not call mutating [`SampleCache`] methods while a reader is alive on
/// the same thread.
#[derive(Debug)]
pub struct CacheReader<'a> {
    state: RwLockReadGuard<'a, CacheState>,
}

impl CacheReader<'_> {
    /// Sample by id
    #[inline]
    #[must_use]
    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.state.maps.sample(id)
    }

    /// Test item by id
    #[inline]
    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&TestItem> {
        self.state.maps.item(id)
    }

    /// Items of a sample in arrival order
    #[inline]
    #[must_use]
    pub fn items_of(&self, id: SampleId) -> Option<&IndexSet<ItemId>> {
        self.state.maps.items_of(id)
    }

    /// Sample shown at a row of the sample view
    #[must_use]
    pub fn sample_at_row(&self, row: usize) -> Option<&Sample> {
        let id = self.state.sample_rows.id_at(row)?;
        self.state.maps.sample(id)
    }

    /// Item shown at a row of the test-item view
    #[must_use]
    pub fn item_at_row(&self, row: usize) -> Option<&TestItem> {
        let id = self.state.item_rows.id_at(row)?;
        self.state.maps.item(id)
    }

    /// Row of an id in its view
    #[inline]
    #[must_use]
    pub fn row_of(&self, key: RowKey) -> Option<usize> {
        self.state.row_of(key)
    }

    /// Id at a row of a view
    #[inline]
    #[must_use]
    pub fn id_at_row(&self, view: ViewMode, row: usize) -> Option<RowKey> {
        self.state.key_at(view, row)
    }

    /// Row count of a view
    #[inline]
    #[must_use]
    pub fn row_count(&self, view: ViewMode) -> usize {
        self.state.row_count(view)
    }

    /// Currently displayed view
    #[inline]
    #[must_use]
    pub fn active_view(&self) -> ViewMode {
        self.state.active_view
    }

    /// Whether the row of a view is selected
    #[must_use]
    pub fn is_selected(&self, view: ViewMode, row: usize) -> bool {
        self.state
            .key_at(view, row)
            .is_some_and(|key| self.state.selection.contains(key))
    }

    /// Remaining reaction seconds of an item
    #[inline]
    #[must_use]
    pub fn remaining(&self, id: ItemId) -> Option<u32> {
        self.state.countdowns.remaining(id)
    }

    /// Cursor row in the active view
    #[must_use]
    pub fn cursor_row(&self) -> Option<usize> {
        self.state.cursor.and_then(|key| self.state.row_of(key))
    }

    /// Structural generation
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.generation
    }
}

/// Sample/test-item cache shared between the rendering path and the
/// notification producers
#[derive(Debug)]
pub struct SampleCache {
    state: RwLock<CacheState>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SampleCache {
    /// Create empty cache
    #[must_use]
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(CacheState::new(config)),
            bus: EventBus::new(),
            clock,
        }
    }

    /// Create empty cache on the system clock
    #[must_use]
    pub fn with_system_clock(config: &CacheConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        self.bus.subscribe()
    }

    /// Clock used for countdowns
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Lock for a consistent multi-value read
    #[must_use]
    pub fn read(&self) -> CacheReader<'_> {
        CacheReader {
            state: self.state.read(),
        }
    }

    // ----- identity maps -----

    /// Sample by id
    #[must_use]
    pub fn get_sample(&self, id: SampleId) -> Option<Sample> {
        self.state.read().maps.sample(id).cloned()
    }

    /// Test item by id
    #[must_use]
    pub fn get_test_item(&self, id: ItemId) -> Option<TestItem> {
        self.state.read().maps.item(id).cloned()
    }

    /// Test items currently belonging to a sample, in arrival order
    #[must_use]
    pub fn get_items_of_sample(&self, id: SampleId) -> Option<IndexSet<ItemId>> {
        self.state.read().maps.items_of(id).cloned()
    }

    /// Total sample count
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.state.read().maps.sample_count()
    }

    /// Total test item count, calculated items included
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.state.read().maps.item_count()
    }

    /// Count of measured test items
    #[must_use]
    pub fn real_item_count(&self) -> usize {
        self.state.read().maps.real_item_count()
    }

    // ----- projections -----

    /// Row of an id in its own view
    #[must_use]
    pub fn row_of(&self, key: RowKey) -> Option<usize> {
        self.state.read().row_of(key)
    }

    /// Id at a row of a view
    #[must_use]
    pub fn id_at_row(&self, view: ViewMode, row: usize) -> Option<RowKey> {
        self.state.read().key_at(view, row)
    }

    /// Sample at a row of the sample view
    #[must_use]
    pub fn sample_at_row(&self, row: usize) -> Option<Sample> {
        self.read().sample_at_row(row).cloned()
    }

    /// Item at a row of the test-item view
    #[must_use]
    pub fn item_at_row(&self, row: usize) -> Option<TestItem> {
        self.read().item_at_row(row).cloned()
    }

    /// Row count of a view
    #[must_use]
    pub fn row_count(&self, view: ViewMode) -> usize {
        self.state.read().row_count(view)
    }

    /// Structural generation; changes whenever any row number may have moved
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Pin a row number to the current generation
    #[must_use]
    pub fn row_ref(&self, view: ViewMode, row: usize) -> Option<RowRef> {
        let state = self.state.read();
        state.key_at(view, row).map(|_| RowRef {
            view,
            row,
            generation: state.generation,
        })
    }

    /// Resolve a pinned row back to its id
    ///
    /// # Errors
    /// - `CacheError::StaleRow` if rows were added or removed since the ref was taken
    /// - `CacheError::RowOutOfRange` if the row does not exist
    pub fn resolve(&self, row_ref: &RowRef) -> CacheResult<RowKey> {
        let state = self.state.read();
        if row_ref.generation != state.generation {
            return Err(CacheError::StaleRow {
                view: row_ref.view,
                row: row_ref.row,
                issued: row_ref.generation,
                current: state.generation,
            });
        }
        state
            .key_at(row_ref.view, row_ref.row)
            .ok_or(CacheError::RowOutOfRange {
                view: row_ref.view,
                row: row_ref.row,
            })
    }

    // ----- view switch and cursor -----

    /// Currently displayed view
    #[must_use]
    pub fn active_view(&self) -> ViewMode {
        self.state.read().active_view
    }

    /// Switch the displayed view, remapping the cursor
    ///
    /// Returns the cursor row in the new view; `None` when there was no
    /// cursor or its record has no counterpart.
    pub fn switch_view(&self, view: ViewMode) -> Option<usize> {
        let mut state = self.state.write();
        let from = state.active_view;
        if from == view {
            return state.cursor.and_then(|key| state.row_of(key));
        }

        let remapped = state.cursor.and_then(|key| state.counterpart(key));
        state.cursor = remapped;
        state.active_view = view;
        let cursor_row = remapped.and_then(|key| state.row_of(key));

        tracing::debug!("Switched view {} -> {}, cursor row {:?}", from, view, cursor_row);
        self.bus.publish(&CacheEvent::ViewSwitched {
            from,
            to: view,
            cursor_row,
        });
        cursor_row
    }

    /// Place the cursor on a row of the active view
    ///
    /// Returns the id under the cursor; an out-of-range row clears it.
    pub fn set_cursor(&self, row: Option<usize>) -> Option<RowKey> {
        let mut state = self.state.write();
        let view = state.active_view;
        let key = row.and_then(|row| state.key_at(view, row));
        state.cursor = key;
        key
    }

    /// Cursor row in the active view
    #[must_use]
    pub fn cursor_row(&self) -> Option<usize> {
        self.read().cursor_row()
    }

    /// Id under the cursor
    #[must_use]
    pub fn cursor_key(&self) -> Option<RowKey> {
        self.state.read().cursor
    }

    // ----- selection -----

    /// Select or deselect one row; returns whether anything changed
    pub fn select(&self, view: ViewMode, row: usize, selected: bool) -> bool {
        let mut state = self.state.write();
        let Some(key) = state.key_at(view, row) else {
            return false;
        };
        let changed = state.selection.set(key, selected);
        if changed {
            self.bus.publish(&CacheEvent::Rows(RowRange {
                kind: ChangeKind::Modify,
                view,
                first: row,
                last: row,
                generation: state.generation,
            }));
        }
        changed
    }

    /// Select or deselect a record by id, for id-keyed detail views
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the id has no row in its view
    pub fn select_id(&self, key: RowKey, selected: bool) -> CacheResult<bool> {
        let mut state = self.state.write();
        let row = state.row_of(key).ok_or(CacheError::NotFound { key })?;
        let changed = state.selection.set(key, selected);
        if changed {
            self.bus.publish(&CacheEvent::Rows(RowRange {
                kind: ChangeKind::Modify,
                view: key.view(),
                first: row,
                last: row,
                generation: state.generation,
            }));
        }
        Ok(changed)
    }

    /// Select every row of a view; returns the row count
    pub fn select_all(&self, view: ViewMode) -> usize {
        let mut state = self.state.write();
        let keys: Vec<RowKey> = match view {
            ViewMode::Sample => state.sample_rows.iter().copied().map(RowKey::Sample).collect(),
            ViewMode::TestItem => state.item_rows.iter().copied().map(RowKey::Item).collect(),
        };
        let count = keys.len();
        state.selection.replace(view, keys);
        if count > 0 {
            self.bus.publish(&CacheEvent::Rows(RowRange {
                kind: ChangeKind::Modify,
                view,
                first: 0,
                last: count - 1,
                generation: state.generation,
            }));
        }
        count
    }

    /// Clear a view's selection; returns how many ids were selected
    ///
    /// Every previously selected row is reported for repaint.
    pub fn clear_selection(&self, view: ViewMode) -> usize {
        let mut state = self.state.write();
        let previous = state.selection.clear(view);
        let rows = previous.iter().filter_map(|key| state.row_of(*key));
        for (first, last) in contiguous_ranges(rows) {
            self.bus.publish(&CacheEvent::Rows(RowRange {
                kind: ChangeKind::Modify,
                view,
                first,
                last,
                generation: state.generation,
            }));
        }
        previous.len()
    }

    /// Whether a row of a view is selected
    #[must_use]
    pub fn is_selected(&self, view: ViewMode, row: usize) -> bool {
        self.read().is_selected(view, row)
    }

    /// Selected ids of a view
    #[must_use]
    pub fn selected_ids(&self, view: ViewMode) -> BTreeSet<RowKey> {
        self.state.read().selection.selected(view)
    }

    /// Selected rows of a view, ascending
    #[must_use]
    pub fn selected_rows(&self, view: ViewMode) -> Vec<usize> {
        let state = self.state.read();
        let mut rows: Vec<usize> = state
            .selection
            .selected(view)
            .into_iter()
            .filter_map(|key| state.row_of(key))
            .collect();
        rows.sort_unstable();
        rows
    }

    // ----- countdowns -----

    /// Remaining reaction seconds of an item
    #[must_use]
    pub fn remaining(&self, id: ItemId) -> Option<u32> {
        self.state.read().countdowns.remaining(id)
    }

    /// Number of live countdowns
    #[must_use]
    pub fn countdown_count(&self) -> usize {
        self.state.read().countdowns.len()
    }

    /// Advance every countdown to the clock's current time
    ///
    /// Returns the ids whose value changed; publishes them as one
    /// [`CacheEvent::CountdownTick`] when non-empty.
    pub fn tick(&self) -> BTreeSet<ItemId> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let changed = state.countdowns.tick(now);
        if !changed.is_empty() {
            tracing::trace!("Countdown tick: {} changed", changed.len());
            self.bus.publish(&CacheEvent::CountdownTick(changed.clone()));
        }
        changed
    }

    // ----- ingestion -----

    /// Apply one sample batch atomically
    ///
    /// Returns the events published for it.
    pub fn apply_samples(&self, batch: SampleBatch) -> Vec<CacheEvent> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let kind = batch.kind;
        let len = batch.records.len();
        let events = state.apply_sample_batch(batch, now);
        tracing::debug!(
            "Applied sample batch {:?} of {} record(s): {} event(s), generation {}",
            kind,
            len,
            events.len(),
            state.generation
        );
        self.bus.publish_all(&events);
        events
    }

    /// Apply one test-item batch atomically
    ///
    /// Returns the events published for it.
    pub fn apply_items(&self, batch: ItemBatch) -> Vec<CacheEvent> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let kind = batch.kind;
        let len = batch.items.len();
        let events = state.apply_item_batch(batch, now);
        tracing::debug!(
            "Applied item batch {:?} of {} item(s): {} event(s), generation {}",
            kind,
            len,
            events.len(),
            state.generation
        );
        self.bus.publish_all(&events);
        events
    }

    /// Replace the whole content with a bulk-loaded snapshot
    ///
    /// Rows follow fetch order; the reverse index is rebuilt from the item
    /// owner fields. Marks the cache ready.
    pub fn load_snapshot(&self, samples: Vec<Sample>, items: Vec<TestItem>) -> Vec<CacheEvent> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let events = state.load_snapshot(samples, items, now);
        tracing::info!(
            "Loaded snapshot: {} sample(s), {} item(s), {} countdown(s)",
            state.maps.sample_count(),
            state.maps.item_count(),
            state.countdowns.len()
        );
        self.bus.publish_all(&events);
        events
    }

    // ----- readiness and display -----

    /// Current load state
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.state.read().readiness
    }

    /// Whether the bulk load completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Record a load-state transition
    pub fn set_readiness(&self, readiness: Readiness) {
        let mut state = self.state.write();
        if state.readiness != readiness {
            state.readiness = readiness;
            self.bus.publish(&CacheEvent::ReadinessChanged(readiness));
        }
    }

    /// Display layout or formatting rules changed
    ///
    /// Returns the new display epoch.
    pub fn invalidate_display(&self) -> u64 {
        let mut state = self.state.write();
        state.display_epoch += 1;
        let epoch = state.display_epoch;
        self.bus.publish(&CacheEvent::DisplayInvalidated { epoch });
        epoch
    }

    /// Current display epoch
    #[must_use]
    pub fn display_epoch(&self) -> u64 {
        self.state.read().display_epoch
    }

    /// Verify the structural invariants between maps, index and projections
    ///
    /// # Errors
    /// Returns `CacheError::Inconsistent` describing the first violation
    pub fn check_consistency(&self) -> CacheResult<()> {
        self.state
            .read()
            .check_consistency()
            .map_err(CacheError::Inconsistent)
    }
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::with_system_clock(&CacheConfig::default())
    }
}
