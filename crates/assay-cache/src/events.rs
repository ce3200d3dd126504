//! Outbound change notifications
//!
//! The rendering layer subscribes to an [`EventBus`] and drains its
//! receiver on its own schedule. Events are sent while the cache lock is
//! still held, so every subscriber sees batches in the order they were
//! applied.

use crate::cache::Readiness;
use crate::projection::ViewMode;
use crate::types::{ItemId, SampleId};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Kind of structural or content change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Rows appended
    Add,
    /// Row content changed in place
    Modify,
    /// Rows removed
    Delete,
}

/// Inclusive row range in one view
///
/// For [`ChangeKind::Delete`] the rows are numbered as they were before the
/// batch removed anything, and ranges of one batch arrive highest first so
/// they can be removed one after another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// What happened to the rows
    pub kind: ChangeKind,
    /// View the rows belong to
    pub view: ViewMode,
    /// First affected row
    pub first: usize,
    /// Last affected row
    pub last: usize,
    /// Structural generation after the batch
    pub generation: u64,
}

impl RowRange {
    /// Number of rows covered
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// Ranges always cover at least one row
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `row` falls inside the range
    #[inline]
    #[must_use]
    pub fn contains(&self, row: usize) -> bool {
        (self.first..=self.last).contains(&row)
    }
}

/// Notification emitted by the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Rows of the active view changed
    Rows(RowRange),
    /// Records whose fields changed, keyed by id for detail views
    RecordsChanged {
        /// Samples added, replaced or removed
        samples: BTreeSet<SampleId>,
        /// Test items added, replaced or removed
        items: BTreeSet<ItemId>,
    },
    /// Countdown values that moved on this tick
    CountdownTick(BTreeSet<ItemId>),
    /// Active view switched; `cursor_row` is the remapped cursor
    ViewSwitched {
        /// Previous view
        from: ViewMode,
        /// New view
        to: ViewMode,
        /// Cursor row in the new view
        cursor_row: Option<usize>,
    },
    /// Display formatting rules changed; cached display strings are stale
    DisplayInvalidated {
        /// New display epoch
        epoch: u64,
    },
    /// Load state changed
    ReadinessChanged(Readiness),
}

/// Fan-out of [`CacheEvent`]s to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<CacheEvent>>>,
}

impl EventBus {
    /// Create bus with no subscribers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    #[must_use]
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, pruning dropped ones
    pub fn publish(&self, event: &CacheEvent) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            tracing::warn!("Dropped {} disconnected event subscriber(s)", dropped);
        }
    }

    /// Deliver a sequence in order
    pub fn publish_all(&self, events: &[CacheEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(first: usize, last: usize) -> RowRange {
        RowRange {
            kind: ChangeKind::Add,
            view: ViewMode::Sample,
            first,
            last,
            generation: 1,
        }
    }

    #[test]
    fn range_len_is_inclusive() {
        assert_eq!(range(2, 2).len(), 1);
        assert_eq!(range(2, 5).len(), 4);
        assert!(range(2, 5).contains(5));
        assert!(!range(2, 5).contains(6));
    }

    #[test]
    fn every_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish_all(&[
            CacheEvent::Rows(range(0, 0)),
            CacheEvent::DisplayInvalidated { epoch: 1 },
        ]);

        for rx in [a, b] {
            assert_eq!(rx.try_recv().unwrap(), CacheEvent::Rows(range(0, 0)));
            assert_eq!(
                rx.try_recv().unwrap(),
                CacheEvent::DisplayInvalidated { epoch: 1 }
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(&CacheEvent::DisplayInvalidated { epoch: 2 });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
