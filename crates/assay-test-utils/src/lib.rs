//! Testing utilities for the assay cache workspace
//!
//! Shared fixtures, clocks and assertions.

#![allow(missing_docs)]

use assay_cache::{
    CacheConfig, ItemId, ManualClock, MemorySource, Sample, SampleCache, SampleId, SampleRecord,
    TestItem, TestStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// Fixed instant all fixtures start from
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

/// Item id derived from its owner so fixtures never collide
pub fn item_id(sample: i64, n: i64) -> ItemId {
    ItemId(sample * 1000 + n)
}

pub fn sample(id: i64) -> Sample {
    Sample::new(SampleId(id))
        .with_seq_no(format!("{id:04}"))
        .with_barcode(format!("BC{id:06}"))
}

pub fn item(sample: i64, n: i64) -> TestItem {
    TestItem::new(item_id(sample, n), SampleId(sample), u32::try_from(n).unwrap_or(0) + 1)
}

/// Item currently reacting, started at [`epoch`]
pub fn reacting_item(sample: i64, n: i64, needed_secs: u32) -> TestItem {
    item(sample, n)
        .with_status(TestStatus::Testing)
        .with_reaction(epoch(), needed_secs)
}

/// Record with `items` pending items
pub fn record(id: i64, items: i64) -> SampleRecord {
    SampleRecord::new(sample(id), (0..items).map(|n| item(id, n)).collect())
}

/// Records for samples `1..=samples`
pub fn bulk_records(samples: i64, items_per_sample: i64) -> Vec<SampleRecord> {
    (1..=samples).map(|id| record(id, items_per_sample)).collect()
}

/// Split records into the two listings served by the control service
pub fn listings(records: &[SampleRecord]) -> (Vec<Sample>, Vec<TestItem>) {
    let samples = records.iter().map(|r| r.sample.clone()).collect();
    let items = records.iter().flat_map(|r| r.items.iter().cloned()).collect();
    (samples, items)
}

pub fn memory_source(samples: i64, items_per_sample: i64) -> MemorySource {
    let (samples, items) = listings(&bulk_records(samples, items_per_sample));
    MemorySource::new(samples, items)
}

/// Empty cache on a manual clock
pub fn setup_cache() -> (SampleCache, Arc<ManualClock>) {
    let clock = manual_clock();
    let cache = SampleCache::new(&CacheConfig::new(), clock.clone());
    (cache, clock)
}

/// Cache preloaded with `samples` records of `items_per_sample` items each
pub fn loaded_cache(samples: i64, items_per_sample: i64) -> (SampleCache, Arc<ManualClock>) {
    let (cache, clock) = setup_cache();
    let (samples, items) = listings(&bulk_records(samples, items_per_sample));
    cache.load_snapshot(samples, items);
    (cache, clock)
}

/// Panic with the consistency report if maps and projections disagree
pub fn assert_consistent(cache: &SampleCache) {
    if let Err(e) = cache.check_consistency() {
        panic!("cache inconsistent: {e}");
    }
}
