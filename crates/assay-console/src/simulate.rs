//! Synthetic workload for the cache
//!
//! Bulk-loads a generated analyzer run, replays seeded random update
//! batches against it, advances reaction countdowns on a manual clock and
//! reports what the cache ended up holding.

use assay_cache::{
    CacheConfig, CacheEvent, CacheService, ChangeKind, Clock, ItemBatch, ItemId, ManualClock,
    MemorySource, RowKey, Sample, SampleBatch, SampleCache, SampleId, SampleKind, SampleRecord,
    TestItem, TestStatus, UpdateKind, ViewMode,
};
use chrono::{TimeDelta, TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

/// Simulation parameters
#[derive(Debug, Clone)]
pub(crate) struct SimulateArgs {
    pub(crate) samples: i64,
    pub(crate) items_per_sample: i64,
    pub(crate) updates: usize,
    pub(crate) ticks: u32,
    pub(crate) seed: u64,
    pub(crate) verify: bool,
}

/// Events observed by the simulated display
#[derive(Debug, Clone, Default)]
pub(crate) struct EventTally {
    pub(crate) added: usize,
    pub(crate) modified: usize,
    pub(crate) deleted: usize,
    pub(crate) records_changed: usize,
    pub(crate) countdown_ticks: usize,
    pub(crate) view_switches: usize,
    pub(crate) other: usize,
}

impl EventTally {
    fn record(&mut self, event: &CacheEvent) {
        match event {
            CacheEvent::Rows(range) => match range.kind {
                ChangeKind::Add => self.added += 1,
                ChangeKind::Modify => self.modified += 1,
                ChangeKind::Delete => self.deleted += 1,
            },
            CacheEvent::RecordsChanged { .. } => self.records_changed += 1,
            CacheEvent::CountdownTick(_) => self.countdown_ticks += 1,
            CacheEvent::ViewSwitched { .. } => self.view_switches += 1,
            _ => self.other += 1,
        }
    }
}

/// Final state of a simulation run
#[derive(Debug, Clone)]
pub(crate) struct SimulationReport {
    pub(crate) samples: usize,
    pub(crate) items: usize,
    pub(crate) real_items: usize,
    pub(crate) sample_rows: usize,
    pub(crate) item_rows: usize,
    pub(crate) countdowns: usize,
    pub(crate) generation: u64,
    pub(crate) events: EventTally,
    pub(crate) violations: Vec<String>,
}

impl SimulationReport {
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Simulation Report:\n");
        out.push_str(&format!("  Samples: {} ({} rows)\n", self.samples, self.sample_rows));
        out.push_str(&format!(
            "  Test Items: {} ({} rows, {} measured)\n",
            self.items, self.item_rows, self.real_items
        ));
        out.push_str(&format!("  Live Countdowns: {}\n", self.countdowns));
        out.push_str(&format!("  Generation: {}\n", self.generation));
        out.push_str(&format!(
            "  Row Events: +{} ~{} -{}\n",
            self.events.added, self.events.modified, self.events.deleted
        ));
        out.push_str(&format!(
            "  Other Events: {} record, {} tick, {} switch, {} misc\n",
            self.events.records_changed,
            self.events.countdown_ticks,
            self.events.view_switches,
            self.events.other
        ));
        out.push_str(&format!("  Violations: {}\n", self.violations.len()));
        for violation in &self.violations {
            out.push_str(&format!("    - {violation}\n"));
        }
        out.push_str(&format!(
            "  Status: {}\n",
            if self.passed() { "PASSED" } else { "FAILED" }
        ));
        out
    }
}

/// Seeded generator of analyzer data and update batches
struct Workload {
    rng: StdRng,
    clock: Arc<ManualClock>,
    items_per_sample: i64,
    next_sample: i64,
}

impl Workload {
    fn new(seed: u64, clock: Arc<ManualClock>, items_per_sample: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            clock,
            items_per_sample,
            next_sample: 1,
        }
    }

    fn sample(&mut self, id: i64) -> Sample {
        let kind = match self.rng.random_range(0..10) {
            0 => SampleKind::QualityControl,
            1 => SampleKind::Calibrator,
            _ => SampleKind::Patient,
        };
        Sample::new(SampleId(id))
            .with_seq_no(format!("{id:04}"))
            .with_barcode(format!("BC{:08}", self.rng.random_range(0..100_000_000u32)))
            .with_kind(kind)
    }

    fn item(&mut self, sample: i64, n: i64) -> TestItem {
        let assay = u32::try_from(n).unwrap_or(0) + 1;
        let item = TestItem::new(ItemId(sample * 1000 + n), SampleId(sample), assay);
        if self.rng.random_bool(0.3) {
            let needed: u32 = self.rng.random_range(60..600);
            let elapsed = self.rng.random_range(0..i64::from(needed));
            let started = self.clock.now() - TimeDelta::seconds(elapsed);
            item.with_status(TestStatus::Testing)
                .with_reaction(started, needed)
        } else {
            item
        }
    }

    fn record(&mut self, id: i64, items: i64) -> SampleRecord {
        let sample = self.sample(id);
        let items = (0..items).map(|n| self.item(id, n)).collect();
        SampleRecord::new(sample, items)
    }

    fn initial(&mut self, samples: i64) -> (Vec<Sample>, Vec<TestItem>) {
        let mut listed_samples = Vec::new();
        let mut listed_items = Vec::new();
        for _ in 0..samples {
            let id = self.next_sample;
            self.next_sample += 1;
            let record = self.record(id, self.items_per_sample);
            listed_samples.push(record.sample);
            listed_items.extend(record.items);
        }
        (listed_samples, listed_items)
    }

    fn random_sample(&mut self, cache: &SampleCache) -> Option<SampleId> {
        let rows = cache.row_count(ViewMode::Sample);
        if rows == 0 {
            return None;
        }
        match cache.id_at_row(ViewMode::Sample, self.rng.random_range(0..rows)) {
            Some(RowKey::Sample(id)) => Some(id),
            _ => None,
        }
    }

    fn random_item(&mut self, cache: &SampleCache) -> Option<TestItem> {
        let rows = cache.row_count(ViewMode::TestItem);
        if rows == 0 {
            return None;
        }
        cache.item_at_row(self.rng.random_range(0..rows))
    }

    /// Apply one random batch and return whether anything was sent
    fn step(&mut self, cache: &SampleCache) -> bool {
        match self.rng.random_range(0..6) {
            0 => {
                let id = self.next_sample;
                self.next_sample += 1;
                let items = self.rng.random_range(0..=self.items_per_sample.max(1));
                let record = self.record(id, items);
                cache.apply_samples(SampleBatch::new(UpdateKind::Add, vec![record]));
            }
            1 => {
                let Some(id) = self.random_sample(cache) else {
                    return false;
                };
                // keep a random subset of the members and add one new item
                let members = cache.get_items_of_sample(id).unwrap_or_default();
                let mut items: Vec<TestItem> = members
                    .iter()
                    .filter(|_| self.rng.random_bool(0.7))
                    .filter_map(|item| cache.get_test_item(*item))
                    .collect();
                let n = i64::try_from(members.len()).unwrap_or(0) + 100;
                items.push(self.item(id.0, n));
                let sample = cache.get_sample(id).unwrap_or_else(|| Sample::new(id));
                cache.apply_samples(SampleBatch::new(
                    UpdateKind::Modify,
                    vec![SampleRecord::new(sample, items)],
                ));
            }
            2 => {
                let Some(id) = self.random_sample(cache) else {
                    return false;
                };
                let record = SampleRecord::new(Sample::new(id), Vec::new());
                cache.apply_samples(SampleBatch::new(UpdateKind::Delete, vec![record]));
            }
            3 => {
                let Some(item) = self.random_item(cache) else {
                    return false;
                };
                let status = if item.status == TestStatus::Testing {
                    TestStatus::Tested
                } else {
                    TestStatus::Testing
                };
                cache.apply_items(ItemBatch::new(UpdateKind::Modify, vec![item.with_status(status)]));
            }
            4 => {
                let Some(item) = self.random_item(cache) else {
                    return false;
                };
                cache.apply_items(ItemBatch::new(UpdateKind::Delete, vec![item]));
            }
            _ => {
                let next = cache.active_view().other();
                cache.switch_view(next);
            }
        }
        true
    }
}

/// Run one seeded simulation
pub(crate) async fn run_simulation(
    config: CacheConfig,
    args: &SimulateArgs,
) -> anyhow::Result<SimulationReport> {
    let start = Utc
        .with_ymd_and_hms(2024, 3, 1, 8, 0, 0)
        .single()
        .unwrap_or_default();
    let clock = Arc::new(ManualClock::new(start));
    let mut workload = Workload::new(args.seed, Arc::clone(&clock), args.items_per_sample);
    let (samples, items) = workload.initial(args.samples);
    let source = MemorySource::new(samples, items);

    let mut service = CacheService::new(config, clock.clone());
    let cache = Arc::clone(service.cache());
    let events = cache.subscribe();
    service.init(&source).await?;
    tracing::info!(
        "Loaded {} sample(s) and {} item(s) in {} page(s)",
        cache.sample_count(),
        cache.item_count(),
        source.pages_served()
    );

    let mut violations = Vec::new();
    let check = |stage: &str, violations: &mut Vec<String>| {
        if let Err(e) = cache.check_consistency() {
            tracing::error!("Consistency violation after {}: {}", stage, e);
            violations.push(format!("{stage}: {e}"));
        }
    };
    if args.verify {
        check("bulk load", &mut violations);
    }

    let mut applied = 0usize;
    for n in 0..args.updates {
        if workload.step(&cache) {
            applied += 1;
        }
        if args.verify {
            check(&format!("update {n}"), &mut violations);
        }
    }
    tracing::info!("Applied {} of {} update(s)", applied, args.updates);

    for _ in 0..args.ticks {
        clock.advance_secs(1);
        cache.tick();
    }
    if args.verify {
        check("countdown ticks", &mut violations);
    }

    service.shutdown().await;

    let mut tally = EventTally::default();
    for event in events.try_iter() {
        tally.record(&event);
    }

    Ok(SimulationReport {
        samples: cache.sample_count(),
        items: cache.item_count(),
        real_items: cache.real_item_count(),
        sample_rows: cache.row_count(ViewMode::Sample),
        item_rows: cache.row_count(ViewMode::TestItem),
        countdowns: cache.countdown_count(),
        generation: cache.generation(),
        events: tally,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(seed: u64) -> SimulateArgs {
        SimulateArgs {
            samples: 20,
            items_per_sample: 3,
            updates: 200,
            ticks: 5,
            seed,
            verify: true,
        }
    }

    #[tokio::test]
    async fn simulation_passes_verification() {
        let report = run_simulation(CacheConfig::default(), &args(42)).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.sample_rows, report.samples);
        assert_eq!(report.item_rows, report.items);
    }

    #[tokio::test]
    async fn same_seed_same_outcome() {
        let a = run_simulation(CacheConfig::default(), &args(7)).await.unwrap();
        let b = run_simulation(CacheConfig::default(), &args(7)).await.unwrap();
        assert_eq!(a.samples, b.samples);
        assert_eq!(a.items, b.items);
        assert_eq!(a.generation, b.generation);
    }
}
