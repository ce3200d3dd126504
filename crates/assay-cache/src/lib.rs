//! Assay Cache - sample and test-item cache for the analyzer console
//!
//! Holds every sample and test item known to the client and presents them
//! as two row-addressable tables:
//! - Identity maps from id to record, plus a sample to item reverse index
//! - Ordinal projections assigning each id a dense row per view
//! - Per-view selection independent of row numbers
//! - Reaction countdowns advanced by a periodic tick
//! - Add/Modify/Delete batch ingestion with row-range notifications
//! - Switching the active view while keeping the cursor on related data
//!
//! # Example
//!
//! ```rust,ignore
//! use assay_cache::prelude::*;
//!
//! # async fn example(source: &dyn RecordSource) -> Result<(), CacheError> {
//! let mut service = CacheService::new(CacheConfig::new(), Arc::new(SystemClock));
//! service.init(source).await?;
//!
//! let cache = service.cache();
//! let events = cache.subscribe();
//! if let Some(sample) = cache.sample_at_row(0) {
//!     println!("first row: {}", sample.id);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod countdown;
pub mod error;
pub mod events;
pub mod identity;
pub mod ingestion;
pub mod projection;
pub mod selection;
pub mod service;
pub mod source;
pub mod types;

pub use cache::{CacheReader, Readiness, RowRef, SampleCache};
pub use config::{CacheConfig, CountdownConfig};
pub use countdown::{Clock, CountdownRegistry, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult, ConfigError, SourceError};
pub use events::{CacheEvent, ChangeKind, EventBus, RowRange};
pub use identity::IdentityMaps;
pub use ingestion::{ItemBatch, SampleBatch, UpdateKind};
pub use projection::{contiguous_ranges, OrdinalProjection, RowKey, ViewMode};
pub use selection::SelectionTracker;
pub use service::CacheService;
pub use source::{fetch_all_pages, BulkLoader, MemorySource, Page, PageRequest, RecordSource};
pub use types::{
    AssayResult, ItemId, Sample, SampleId, SampleKind, SampleRecord, TestItem, TestMode,
    TestStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the cache
    pub use crate::{
        CacheConfig, CacheError, CacheEvent, CacheService, ChangeKind, Clock, ItemBatch, ItemId,
        RecordSource, RowKey, Sample, SampleBatch, SampleCache, SampleId, SampleRecord,
        SystemClock, TestItem, TestStatus, UpdateKind, ViewMode,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
