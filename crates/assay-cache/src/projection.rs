//! Row-ordered projections over the cached records
//!
//! Each view mode owns one [`OrdinalProjection`]: an insertion-ordered
//! sequence of identities where the position is the displayed row.
//! Removing an entry shifts every later row down by one.

use crate::types::{ItemId, SampleId};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Which row ordering the console currently displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewMode {
    /// One row per sample
    #[default]
    Sample,
    /// One row per test item
    TestItem,
}

impl ViewMode {
    /// The other view
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Sample => Self::TestItem,
            Self::TestItem => Self::Sample,
        }
    }
}

impl std::fmt::Display for ViewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sample => f.write_str("sample"),
            Self::TestItem => f.write_str("test-item"),
        }
    }
}

/// Identity behind a row of either view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    /// Row of the sample view
    Sample(SampleId),
    /// Row of the test-item view
    Item(ItemId),
}

impl RowKey {
    /// View this key lives in
    #[inline]
    #[must_use]
    pub fn view(self) -> ViewMode {
        match self {
            Self::Sample(_) => ViewMode::Sample,
            Self::Item(_) => ViewMode::TestItem,
        }
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sample(id) => write!(f, "{id}"),
            Self::Item(id) => write!(f, "{id}"),
        }
    }
}

/// Insertion-ordered identity sequence
///
/// Lookups in both directions are O(1); `remove` is O(n) because later
/// rows shift down.
#[derive(Debug, Clone)]
pub struct OrdinalProjection<K> {
    rows: IndexSet<K>,
}

impl<K: Copy + Eq + Hash> OrdinalProjection<K> {
    /// Create empty projection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: IndexSet::new(),
        }
    }

    /// Append at the end; returns the new row, or the existing row if the
    /// id is already present
    pub fn append(&mut self, id: K) -> usize {
        self.rows.insert_full(id).0
    }

    /// Remove and shift later rows; returns the row it occupied
    pub fn remove(&mut self, id: &K) -> Option<usize> {
        self.rows.shift_remove_full(id).map(|(row, _)| row)
    }

    /// Row of an id
    #[inline]
    #[must_use]
    pub fn row_of(&self, id: &K) -> Option<usize> {
        self.rows.get_index_of(id)
    }

    /// Id at a row
    #[inline]
    #[must_use]
    pub fn id_at(&self, row: usize) -> Option<K> {
        self.rows.get_index(row).copied()
    }

    /// Whether the id has a row
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.rows.contains(id)
    }

    /// Row count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if projection is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ids in row order
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.rows.iter()
    }

    /// Drop every row
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

impl<K: Copy + Eq + Hash> Default for OrdinalProjection<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse row numbers into inclusive contiguous ranges, ascending
#[must_use]
pub fn contiguous_ranges(rows: impl IntoIterator<Item = usize>) -> Vec<(usize, usize)> {
    let mut sorted: Vec<usize> = rows.into_iter().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for row in sorted {
        match ranges.last_mut() {
            Some((_, last)) if *last + 1 == row => *last = row,
            _ => ranges.push((row, row)),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_arrival_order() {
        let mut proj = OrdinalProjection::new();
        assert_eq!(proj.append(SampleId(7)), 0);
        assert_eq!(proj.append(SampleId(3)), 1);
        assert_eq!(proj.append(SampleId(5)), 2);

        assert_eq!(proj.id_at(1), Some(SampleId(3)));
        assert_eq!(proj.row_of(&SampleId(5)), Some(2));
    }

    #[test]
    fn duplicate_append_keeps_original_row() {
        let mut proj = OrdinalProjection::new();
        proj.append(ItemId(1));
        proj.append(ItemId(2));
        assert_eq!(proj.append(ItemId(1)), 0);
        assert_eq!(proj.len(), 2);
    }

    #[test]
    fn remove_shifts_later_rows() {
        let mut proj = OrdinalProjection::new();
        for id in 1..=4 {
            proj.append(ItemId(id));
        }

        assert_eq!(proj.remove(&ItemId(2)), Some(1));
        assert_eq!(proj.row_of(&ItemId(3)), Some(1));
        assert_eq!(proj.row_of(&ItemId(4)), Some(2));
        assert_eq!(proj.remove(&ItemId(2)), None);
    }

    #[test]
    fn out_of_range_row_is_none() {
        let proj: OrdinalProjection<SampleId> = OrdinalProjection::new();
        assert_eq!(proj.id_at(0), None);
    }

    #[test]
    fn ranges_coalesce_adjacent_rows() {
        assert_eq!(
            contiguous_ranges([5, 1, 2, 3, 9, 10, 2]),
            vec![(1, 3), (5, 5), (9, 10)]
        );
        assert!(contiguous_ranges(Vec::new()).is_empty());
    }

    #[test]
    fn view_mode_other() {
        assert_eq!(ViewMode::Sample.other(), ViewMode::TestItem);
        assert_eq!(RowKey::Item(ItemId(1)).view(), ViewMode::TestItem);
    }
}
