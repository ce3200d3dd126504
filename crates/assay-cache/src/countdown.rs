//! Remaining-reaction-time registry
//!
//! Provides [`CountdownRegistry`], which estimates how long each in-progress
//! test item still needs on the analyzer:
//! - entries are created and removed by status transitions during ingestion
//! - every tick recomputes `needed - elapsed(reaction start)`, clamped to zero
//! - values never increase for an unchanged entry
//!
//! Time comes from a [`Clock`] so ticks can be driven deterministically.

use crate::types::ItemId;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// Source of wall-clock time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move forward by whole seconds
    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock() += TimeDelta::seconds(secs);
    }

    /// Move forward by a std duration
    pub fn advance(&self, by: std::time::Duration) {
        if let Ok(delta) = TimeDelta::from_std(by) {
            *self.now.lock() += delta;
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CountdownEntry {
    started_at: DateTime<Utc>,
    needed_secs: u32,
    remaining_secs: u32,
}

impl CountdownEntry {
    fn compute(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - self.started_at).num_seconds().max(0);
        let left = i64::from(self.needed_secs) - elapsed;
        u32::try_from(left.max(0)).unwrap_or(0)
    }
}

/// Live countdowns keyed by test item
#[derive(Debug, Default, Clone)]
pub struct CountdownRegistry {
    entries: HashMap<ItemId, CountdownEntry>,
}

impl CountdownRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or refresh a countdown; returns the remaining seconds
    ///
    /// Re-tracking with the same reaction start keeps the current value so
    /// a modify notification cannot move a countdown backwards in time.
    pub fn track(
        &mut self,
        id: ItemId,
        started_at: DateTime<Utc>,
        needed_secs: u32,
        now: DateTime<Utc>,
    ) -> u32 {
        let mut entry = CountdownEntry {
            started_at,
            needed_secs,
            remaining_secs: needed_secs,
        };
        let computed = entry.compute(now);
        entry.remaining_secs = match self.entries.get(&id) {
            Some(prev) if prev.started_at == started_at && prev.needed_secs == needed_secs => {
                computed.min(prev.remaining_secs)
            }
            _ => computed,
        };
        self.entries.insert(id, entry);
        entry.remaining_secs
    }

    /// Stop a countdown; returns whether one existed
    pub fn untrack(&mut self, id: ItemId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Remaining seconds as of the latest tick or track
    #[inline]
    #[must_use]
    pub fn remaining(&self, id: ItemId) -> Option<u32> {
        self.entries.get(&id).map(|entry| entry.remaining_secs)
    }

    /// Whether an item has a countdown
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Recompute every entry; returns ids whose value changed
    ///
    /// Entries at zero stay until their item leaves the testing state.
    pub fn tick(&mut self, now: DateTime<Utc>) -> BTreeSet<ItemId> {
        let mut changed = BTreeSet::new();
        for (id, entry) in &mut self.entries {
            let next = entry.compute(now).min(entry.remaining_secs);
            if next != entry.remaining_secs {
                entry.remaining_secs = next;
                changed.insert(*id);
            }
        }
        changed
    }

    /// Number of tracked items
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked item ids
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.entries.keys()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
