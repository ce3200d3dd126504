//! Record types mirrored by the cache
//!
//! Defines the records delivered by the analyzer's control service:
//! - Sample and test-item identities
//! - Sample and test-item records (always replaced wholesale)
//! - Typed assay result payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a sample record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleId(pub i64);

impl std::fmt::Display for SampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Stable identity of a test item record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Specimen classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleKind {
    /// Patient specimen
    #[default]
    Patient,
    /// Quality-control material
    QualityControl,
    /// Calibrator material
    Calibrator,
}

/// How the sample was scheduled on the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestMode {
    /// Regular rack loading
    #[default]
    Routine,
    /// Emergency (STAT) position
    Stat,
    /// Re-run of a previously tested sample
    Rerun,
}

/// Processing status shared by samples and test items
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    /// Requested, not started
    #[default]
    Pending,
    /// On the analyzer
    Testing,
    /// Finished
    Tested,
}

/// One specimen record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable identity
    pub id: SampleId,
    /// Sequence number assigned at registration
    pub seq_no: String,
    /// Tube barcode, empty when not scanned
    pub barcode: String,
    /// Specimen classification
    pub kind: SampleKind,
    /// Scheduling mode
    pub test_mode: TestMode,
    /// Processing status
    pub status: TestStatus,
    /// End of the first run
    pub end_test_time: Option<DateTime<Utc>>,
    /// End of the latest re-run
    pub end_retest_time: Option<DateTime<Utc>>,
    /// Results reviewed by an operator
    pub audited: bool,
    /// Results sent to the LIS
    pub uploaded: bool,
}

impl Sample {
    /// Create pending patient sample with given id
    #[must_use]
    pub fn new(id: SampleId) -> Self {
        Self {
            id,
            seq_no: String::new(),
            barcode: String::new(),
            kind: SampleKind::Patient,
            test_mode: TestMode::Routine,
            status: TestStatus::Pending,
            end_test_time: None,
            end_retest_time: None,
            audited: false,
            uploaded: false,
        }
    }

    /// With sequence number
    #[inline]
    #[must_use]
    pub fn with_seq_no(mut self, seq_no: impl Into<String>) -> Self {
        self.seq_no = seq_no.into();
        self
    }

    /// With barcode
    #[inline]
    #[must_use]
    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = barcode.into();
        self
    }

    /// With specimen kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }
}

/// Typed result payload of a finished or partially finished assay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AssayResult {
    /// Photometric chemistry result
    Chemistry {
        /// Concentration of the first run
        concentration: Option<f64>,
        /// Concentration of the re-run
        retest_concentration: Option<f64>,
        /// Raw absorbance readings as reported
        absorbance: Vec<String>,
    },
    /// Chemiluminescence immunoassay result
    Immunoassay {
        /// Concentration of the first run
        concentration: Option<f64>,
        /// Concentration of the re-run
        retest_concentration: Option<f64>,
        /// Raw light units as reported
        rlu: String,
    },
    /// Ion-selective electrode result
    Ise {
        /// Concentration of the first run
        concentration: Option<f64>,
        /// Concentration of the re-run
        retest_concentration: Option<f64>,
        /// Electrode potential as reported
        potential_mv: String,
    },
    /// Result computed from other assays on the same sample
    Calculated {
        /// Computed value
        value: Option<f64>,
        /// Formula name
        formula: String,
    },
}

impl AssayResult {
    /// First-run concentration, if the payload carries one
    #[must_use]
    pub fn concentration(&self) -> Option<f64> {
        match self {
            Self::Chemistry { concentration, .. }
            | Self::Immunoassay { concentration, .. }
            | Self::Ise { concentration, .. } => *concentration,
            Self::Calculated { value, .. } => *value,
        }
    }

    /// Re-run concentration; calculated results are never re-run
    #[must_use]
    pub fn retest_concentration(&self) -> Option<f64> {
        match self {
            Self::Chemistry {
                retest_concentration,
                ..
            }
            | Self::Immunoassay {
                retest_concentration,
                ..
            }
            | Self::Ise {
                retest_concentration,
                ..
            } => *retest_concentration,
            Self::Calculated { .. } => None,
        }
    }

    /// Raw signal strings for display
    #[must_use]
    pub fn raw_signals(&self) -> Vec<&str> {
        match self {
            Self::Chemistry { absorbance, .. } => absorbance.iter().map(String::as_str).collect(),
            Self::Immunoassay { rlu, .. } => vec![rlu.as_str()],
            Self::Ise { potential_mv, .. } => vec![potential_mv.as_str()],
            Self::Calculated { .. } => Vec::new(),
        }
    }
}

/// One requested assay on one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    /// Stable identity
    pub id: ItemId,
    /// Owning sample (back-reference)
    pub sample_id: SampleId,
    /// Assay code configured on the analyzer
    pub assay_code: u32,
    /// Processing status
    pub status: TestStatus,
    /// Result payload, absent until the analyzer reports one
    pub result: Option<AssayResult>,
    /// Sample aspiration finished
    pub sampling_completed: bool,
    /// Configured reaction duration in seconds
    pub needed_reaction_secs: u32,
    /// Start of the latest reaction
    pub reaction_started_at: Option<DateTime<Utc>>,
}

impl TestItem {
    /// Create pending item for a sample
    #[must_use]
    pub fn new(id: ItemId, sample_id: SampleId, assay_code: u32) -> Self {
        Self {
            id,
            sample_id,
            assay_code,
            status: TestStatus::Pending,
            result: None,
            sampling_completed: false,
            needed_reaction_secs: 0,
            reaction_started_at: None,
        }
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark aspiration finished and reaction started
    #[inline]
    #[must_use]
    pub fn with_reaction(mut self, started_at: DateTime<Utc>, needed_secs: u32) -> Self {
        self.sampling_completed = true;
        self.reaction_started_at = Some(started_at);
        self.needed_reaction_secs = needed_secs;
        self
    }

    /// With result payload
    #[inline]
    #[must_use]
    pub fn with_result(mut self, result: AssayResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Derived from other items rather than measured; read off the result kind
    #[inline]
    #[must_use]
    pub fn is_calculated(&self) -> bool {
        matches!(self.result, Some(AssayResult::Calculated { .. }))
    }

    /// Whether the item should carry a live reaction countdown
    #[must_use]
    pub fn countdown_eligible(&self) -> bool {
        self.status == TestStatus::Testing
            && self.sampling_completed
            && self.needed_reaction_secs > 0
            && self.reaction_started_at.is_some()
    }
}

/// Sample together with the full set of its test items
///
/// The sample push channel delivers this shape; `items` is the complete
/// membership of the sample at the time of the notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Sample fields
    pub sample: Sample,
    /// Every test item belonging to the sample
    pub items: Vec<TestItem>,
}

impl SampleRecord {
    /// Create record
    #[inline]
    #[must_use]
    pub fn new(sample: Sample, items: Vec<TestItem>) -> Self {
        Self { sample, items }
    }

    /// Record identity
    #[inline]
    #[must_use]
    pub fn id(&self) -> SampleId {
        self.sample.id
    }
}
