//! Upstream record source and bulk loader
//!
//! The control service exposes two independent paged listings, one for
//! samples and one for test items. [`BulkLoader`] drains both concurrently
//! and hands the combined result to [`SampleCache::load_snapshot`].

use crate::cache::{Readiness, SampleCache};
use crate::error::{CacheResult, SourceError};
use crate::types::{Sample, TestItem};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One page of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number
    pub index: usize,
    /// Records per page
    pub size: usize,
}

impl PageRequest {
    /// Offset of the first record
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.index * self.size
    }
}

/// Records of one page
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Records in listing order
    pub records: Vec<T>,
    /// No further pages follow
    pub last: bool,
}

/// Paged access to the analyzer's sample and test-item listings
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page of samples
    async fn fetch_samples(&self, page: PageRequest) -> Result<Page<Sample>, SourceError>;

    /// Fetch one page of test items
    async fn fetch_items(&self, page: PageRequest) -> Result<Page<TestItem>, SourceError>;
}

/// Drain a paged listing in order
///
/// An empty page ends the listing even if it is not flagged as last.
pub async fn fetch_all_pages<T, F, Fut>(mut fetch: F, page_size: usize) -> Result<Vec<T>, SourceError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, SourceError>>,
{
    let mut records = Vec::new();
    let mut index = 0;
    loop {
        let page = fetch(PageRequest {
            index,
            size: page_size,
        })
        .await?;
        let done = page.last || page.records.is_empty();
        records.extend(page.records);
        if done {
            return Ok(records);
        }
        index += 1;
    }
}

/// Startup loader running both listings side by side
#[derive(Debug, Clone, Copy)]
pub struct BulkLoader {
    page_size: usize,
}

impl BulkLoader {
    /// Create loader
    #[inline]
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Fetch every sample and item, awaiting both listings once
    ///
    /// # Errors
    /// Returns the first [`SourceError`] of either listing
    pub async fn fetch_all(
        &self,
        source: &dyn RecordSource,
    ) -> Result<(Vec<Sample>, Vec<TestItem>), SourceError> {
        let samples = fetch_all_pages(move |page| source.fetch_samples(page), self.page_size);
        let items = fetch_all_pages(move |page| source.fetch_items(page), self.page_size);
        tokio::try_join!(samples, items)
    }

    /// Fetch and install a snapshot, tracking readiness
    ///
    /// # Errors
    /// Returns `CacheError::Transport` if either listing fails; the cache
    /// is then marked [`Readiness::Failed`] and keeps its previous content.
    pub async fn load_into(&self, cache: &SampleCache, source: &dyn RecordSource) -> CacheResult<()> {
        cache.set_readiness(Readiness::Loading);
        tracing::info!("Bulk load started (page size {})", self.page_size);

        match self.fetch_all(source).await {
            Ok((samples, items)) => {
                cache.load_snapshot(samples, items);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Bulk load failed: {}", e);
                cache.set_readiness(Readiness::Failed);
                Err(e.into())
            }
        }
    }
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new(500)
    }
}

/// In-memory source serving fixed listings
#[derive(Debug, Default)]
pub struct MemorySource {
    samples: Vec<Sample>,
    items: Vec<TestItem>,
    fail_item_page: Option<usize>,
    offline: Option<String>,
    pages_served: AtomicUsize,
}

impl MemorySource {
    /// Create source
    #[must_use]
    pub fn new(samples: Vec<Sample>, items: Vec<TestItem>) -> Self {
        Self {
            samples,
            items,
            fail_item_page: None,
            offline: None,
            pages_served: AtomicUsize::new(0),
        }
    }

    /// Fail when the given item page is requested
    #[inline]
    #[must_use]
    pub fn failing_item_page(mut self, page: usize) -> Self {
        self.fail_item_page = Some(page);
        self
    }

    /// Refuse every request as if the service were down
    #[inline]
    #[must_use]
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.offline = Some(reason.into());
        self
    }

    fn reachable(&self) -> Result<(), SourceError> {
        match &self.offline {
            Some(reason) => Err(SourceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Pages served so far across both listings
    #[must_use]
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    fn slice<T: Clone>(&self, all: &[T], page: PageRequest) -> Page<T> {
        self.pages_served.fetch_add(1, Ordering::SeqCst);
        let start = page.offset().min(all.len());
        let end = (start + page.size).min(all.len());
        Page {
            records: all[start..end].to_vec(),
            last: end >= all.len(),
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_samples(&self, page: PageRequest) -> Result<Page<Sample>, SourceError> {
        self.reachable()?;
        Ok(self.slice(&self.samples, page))
    }

    async fn fetch_items(&self, page: PageRequest) -> Result<Page<TestItem>, SourceError> {
        self.reachable()?;
        if self.fail_item_page == Some(page.index) {
            return Err(SourceError::page(page.index, "injected failure"));
        }
        Ok(self.slice(&self.items, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::CacheError;
    use crate::types::{ItemId, SampleId};

    fn source(samples: i64, items_per_sample: i64) -> MemorySource {
        let s = (1..=samples).map(|id| Sample::new(SampleId(id))).collect();
        let i = (1..=samples)
            .flat_map(|sid| {
                (0..items_per_sample)
                    .map(move |n| TestItem::new(ItemId(sid * 100 + n), SampleId(sid), 1))
            })
            .collect();
        MemorySource::new(s, i)
    }

    #[tokio::test]
    async fn fetch_all_pages_in_order() {
        let src = source(5, 2);
        let (samples, items) = BulkLoader::new(2).fetch_all(&src).await.unwrap();

        assert_eq!(samples.len(), 5);
        assert_eq!(items.len(), 10);
        assert_eq!(samples[4].id, SampleId(5));
        assert_eq!(items[0].id, ItemId(100));
        // 3 sample pages + 5 item pages
        assert_eq!(src.pages_served(), 8);
    }

    #[tokio::test]
    async fn empty_listing_takes_one_page() {
        let src = MemorySource::default();
        let (samples, items) = BulkLoader::new(10).fetch_all(&src).await.unwrap();
        assert!(samples.is_empty());
        assert!(items.is_empty());
        assert_eq!(src.pages_served(), 2);
    }

    #[tokio::test]
    async fn load_into_marks_ready() {
        let cache = SampleCache::with_system_clock(&CacheConfig::default());
        BulkLoader::new(3).load_into(&cache, &source(3, 2)).await.unwrap();

        assert_eq!(cache.readiness(), Readiness::Ready);
        assert_eq!(cache.sample_count(), 3);
        assert_eq!(cache.item_count(), 6);
        assert!(cache.check_consistency().is_ok());
    }

    #[tokio::test]
    async fn failed_page_marks_failed() {
        let cache = SampleCache::with_system_clock(&CacheConfig::default());
        let src = source(3, 2).failing_item_page(1);

        let err = BulkLoader::new(2).load_into(&cache, &src).await.unwrap_err();

        assert!(matches!(err, CacheError::Transport(SourceError::Page { page: 1, .. })));
        assert_eq!(cache.readiness(), Readiness::Failed);
        assert_eq!(cache.sample_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_source_reports_unavailable() {
        let src = source(2, 1).unavailable("connection refused");
        let err = BulkLoader::default().fetch_all(&src).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert_eq!(src.pages_served(), 0);
    }
}
