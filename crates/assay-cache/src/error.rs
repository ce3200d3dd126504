//! Error types for the sample cache
//!
//! Lookups that simply miss return `Option`; these errors cover the
//! operations where absence is not the only failure:
//! - Row references that outlived a structural change
//! - Bulk-load transport failures
//! - Configuration loading
//! - Service lifecycle misuse

use crate::projection::{RowKey, ViewMode};
use std::path::PathBuf;

/// Main cache error type
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Identity not present in the cache
    #[error("not found: {key}")]
    NotFound {
        /// Missing identity
        key: RowKey,
    },

    /// Row not present in a view
    #[error("row {row} out of range in {view} view")]
    RowOutOfRange {
        /// View that was indexed
        view: ViewMode,
        /// Requested row
        row: usize,
    },

    /// Row number computed before a structural change
    #[error("stale row {row} in {view} view: issued at generation {issued}, now {current}")]
    StaleRow {
        /// View the row was taken from
        view: ViewMode,
        /// Row number as issued
        row: usize,
        /// Generation when the row was issued
        issued: u64,
        /// Generation at resolution time
        current: u64,
    },

    /// Bulk load has not completed
    #[error("cache not ready")]
    NotReady,

    /// Service already initialized
    #[error("cache service already running")]
    AlreadyRunning,

    /// Derived structures disagree with the record maps
    #[error("inconsistent cache state: {0}")]
    Inconsistent(String),

    /// Upstream fetch or channel failed
    #[error("transport failure: {0}")]
    Transport(#[from] SourceError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Check if the caller should re-resolve rows and retry
    #[inline]
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleRow { .. })
    }
}

/// Failures of the upstream record source
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Service could not be reached
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// A page could not be fetched or decoded
    #[error("page {page} failed: {message}")]
    Page {
        /// Zero-based page number
        page: usize,
        /// Transport or decode message
        message: String,
    },
}

impl SourceError {
    /// Create page error
    pub fn page(page: usize, message: impl Into<String>) -> Self {
        Self::Page {
            page,
            message: message.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {}: {source}", path.display())]
    Io {
        /// File that failed to read
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the schema
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
