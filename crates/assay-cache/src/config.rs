//! Cache configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! tick_interval_ms = 1000
//! page_size = 500
//! initial_view = "test-item"
//!
//! [countdown]
//! enabled = true
//! ```

use crate::error::ConfigError;
use crate::projection::ViewMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Countdown tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Records requested per bulk-load page
    pub page_size: usize,
    /// View active after construction
    pub initial_view: ViewMode,
    /// Countdown settings
    pub countdown: CountdownConfig,
}

/// Countdown settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountdownConfig {
    /// Track reaction countdowns at all
    pub enabled: bool,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl CacheConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text and validate
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML for this schema or a
    /// value is out of range
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or fails [`Self::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded cache config from {}", path.display());
        Ok(config)
    }

    /// Serialize to TOML
    #[must_use]
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Reject unusable values
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a zero tick interval or page size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be > 0".into()));
        }
        Ok(())
    }

    /// Tick period as a duration
    #[inline]
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// With tick interval
    #[inline]
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// With initial view
    #[inline]
    #[must_use]
    pub fn with_initial_view(mut self, view: ViewMode) -> Self {
        self.initial_view = view;
        self
    }

    /// With countdowns enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_countdown(mut self, enabled: bool) -> Self {
        self.countdown.enabled = enabled;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            page_size: 500,
            initial_view: ViewMode::Sample,
            countdown: CountdownConfig::default(),
        }
    }
}
