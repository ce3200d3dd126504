//! Cache lifecycle
//!
//! [`CacheService`] is constructed by the application's composition root and
//! hands out the shared [`SampleCache`]. `init()` performs the bulk load and
//! starts the countdown ticker; push channels are attached afterwards so no
//! incremental batch is overwritten by the snapshot. `shutdown()` stops every
//! background task.

use crate::cache::SampleCache;
use crate::config::CacheConfig;
use crate::countdown::Clock;
use crate::error::{CacheError, CacheResult};
use crate::ingestion::{ItemBatch, SampleBatch};
use crate::source::{BulkLoader, RecordSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owner of the cache and its background tasks
#[derive(Debug)]
pub struct CacheService {
    cache: Arc<SampleCache>,
    config: CacheConfig,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    running: bool,
}

impl CacheService {
    /// Create service with an empty cache
    #[must_use]
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(SampleCache::new(&config, clock));
        let (shutdown, _) = watch::channel(false);
        Self {
            cache,
            config,
            shutdown,
            tasks: Vec::new(),
            running: false,
        }
    }

    /// Shared cache handle
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<SampleCache> {
        &self.cache
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether `init` succeeded and `shutdown` has not run
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bulk-load the cache and start the countdown ticker
    ///
    /// # Errors
    /// - `CacheError::AlreadyRunning` if called twice without `shutdown`
    /// - `CacheError::Transport` if the bulk load fails
    pub async fn init(&mut self, source: &dyn RecordSource) -> CacheResult<()> {
        if self.running {
            return Err(CacheError::AlreadyRunning);
        }
        self.shutdown.send_replace(false);

        BulkLoader::new(self.config.page_size)
            .load_into(&self.cache, source)
            .await?;

        if self.config.countdown.enabled {
            self.tasks.push(spawn_ticker(
                Arc::clone(&self.cache),
                self.config.tick_interval(),
                self.shutdown.subscribe(),
            ));
        }
        self.running = true;
        tracing::info!(
            "Cache service started: {} sample(s), tick {:?}",
            self.cache.sample_count(),
            self.config.tick_interval()
        );
        Ok(())
    }

    /// Consume the sample and test-item push channels
    ///
    /// # Errors
    /// Returns `CacheError::NotReady` before `init` succeeded
    pub fn attach_feeds(
        &mut self,
        samples: mpsc::Receiver<SampleBatch>,
        items: mpsc::Receiver<ItemBatch>,
    ) -> CacheResult<()> {
        if !self.running {
            return Err(CacheError::NotReady);
        }

        let cache = Arc::clone(&self.cache);
        self.tasks.push(spawn_feed(
            "sample",
            samples,
            self.shutdown.subscribe(),
            move |batch| {
                cache.apply_samples(batch);
            },
        ));

        let cache = Arc::clone(&self.cache);
        self.tasks.push(spawn_feed(
            "item",
            items,
            self.shutdown.subscribe(),
            move |batch| {
                cache.apply_items(batch);
            },
        ));
        Ok(())
    }

    /// Create bounded push channels and attach their receiving ends
    ///
    /// # Errors
    /// Returns `CacheError::NotReady` before `init` succeeded
    pub fn open_feeds(
        &mut self,
        capacity: usize,
    ) -> CacheResult<(mpsc::Sender<SampleBatch>, mpsc::Sender<ItemBatch>)> {
        let (sample_tx, sample_rx) = mpsc::channel(capacity.max(1));
        let (item_tx, item_rx) = mpsc::channel(capacity.max(1));
        self.attach_feeds(sample_rx, item_rx)?;
        Ok((sample_tx, item_tx))
    }

    /// Stop the ticker and feed consumers and wait for them to exit
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Cache task ended abnormally: {}", e);
            }
        }
        if self.running {
            tracing::info!("Cache service stopped");
        }
        self.running = false;
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn spawn_ticker(
    cache: Arc<SampleCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    cache.tick();
                }
            }
        }
        tracing::debug!("Countdown ticker stopped");
    })
}

fn spawn_feed<B, F>(
    name: &'static str,
    mut rx: mpsc::Receiver<B>,
    mut shutdown: watch::Receiver<bool>,
    mut apply: F,
) -> JoinHandle<()>
where
    B: Send + 'static,
    F: FnMut(B) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => apply(batch),
                    None => {
                        tracing::debug!("{} channel closed by producer", name);
                        break;
                    }
                },
            }
        }
        tracing::debug!("{} feed stopped", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::ManualClock;
    use crate::ingestion::UpdateKind;
    use crate::source::MemorySource;
    use crate::types::{ItemId, Sample, SampleId, SampleRecord, TestItem, TestStatus};
    use chrono::{TimeZone, Utc};

    fn seeded() -> MemorySource {
        MemorySource::new(
            vec![Sample::new(SampleId(1))],
            vec![TestItem::new(ItemId(10), SampleId(1), 1)],
        )
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn init_twice_is_rejected() {
        let mut service = CacheService::new(CacheConfig::default(), manual_clock());
        service.init(&seeded()).await.unwrap();
        assert!(matches!(
            service.init(&seeded()).await,
            Err(CacheError::AlreadyRunning)
        ));
        service.shutdown().await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn feeds_require_init() {
        let mut service = CacheService::new(CacheConfig::default(), manual_clock());
        assert!(matches!(service.open_feeds(4), Err(CacheError::NotReady)));
    }

    #[tokio::test]
    async fn feed_batches_reach_cache_in_order() {
        let mut service = CacheService::new(CacheConfig::default(), manual_clock());
        service.init(&seeded()).await.unwrap();
        let (samples, _items) = service.open_feeds(8).unwrap();
        let events = service.cache().subscribe();

        let record = SampleRecord::new(
            Sample::new(SampleId(2)),
            vec![TestItem::new(ItemId(20), SampleId(2), 1)],
        );
        samples
            .send(SampleBatch::new(UpdateKind::Add, vec![record.clone()]))
            .await
            .unwrap();
        samples
            .send(SampleBatch::new(UpdateKind::Delete, vec![record]))
            .await
            .unwrap();
        drop(samples);

        // wait until both batches were applied
        let mut seen = 0;
        while seen < 2 {
            let event = tokio::task::spawn_blocking({
                let events = events.clone();
                move || events.recv_timeout(Duration::from_secs(5))
            })
            .await
            .unwrap()
            .unwrap();
            if matches!(event, crate::events::CacheEvent::RecordsChanged { .. }) {
                seen += 1;
            }
        }

        assert_eq!(service.cache().sample_count(), 1);
        assert!(service.cache().check_consistency().is_ok());
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_advances_countdowns() {
        let clock = manual_clock();
        let start = clock.now();
        let source = MemorySource::new(
            vec![Sample::new(SampleId(1))],
            vec![TestItem::new(ItemId(10), SampleId(1), 1)
                .with_status(TestStatus::Testing)
                .with_reaction(start, 120)],
        );
        let mut service = CacheService::new(CacheConfig::default(), clock.clone());
        service.init(&source).await.unwrap();
        assert_eq!(service.cache().remaining(ItemId(10)), Some(120));

        clock.advance_secs(3);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(service.cache().remaining(ItemId(10)), Some(117));
        service.shutdown().await;
    }
}
