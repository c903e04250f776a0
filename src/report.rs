//! Historical duration estimation.
//!
//! Previous runs leave JUnit-style reports behind. A [`DurationEstimator`]
//! reads them and overwrites the default per-test cost in the catalog with
//! the observed one, so the partitioner can balance buckets by real time.
//!
//! A test can show up in several report files. Observations are gathered
//! first and combined once per test according to [`Precedence`].

pub mod junit;

use serde::{Deserialize, Serialize};

use crate::discovery::Catalog;

pub use junit::JunitHistory;

/// Result type for report operations.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors that can occur while reading historical reports.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The report directory does not exist or is not a directory.
    #[error("Report directory not found: {0}")]
    MissingDirectory(String),
}

/// How several observed durations for one test are combined.
///
/// # Example
///
/// ```toml
/// [partition]
/// precedence = "longest"
/// ```
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Precedence {
    /// The last observation wins. Report files are visited in sorted path
    /// order, and lines in file order.
    #[default]
    Latest,

    /// The largest observation wins.
    Longest,

    /// The arithmetic mean of all observations.
    Mean,
}

impl Precedence {
    /// Combines observations in the order they were seen.
    ///
    /// Returns `None` for an empty slice.
    ///
    /// # Example
    ///
    /// ```
    /// use soup::report::Precedence;
    ///
    /// let seen = [1.0, 4.0, 2.0];
    /// assert_eq!(Precedence::Latest.resolve(&seen), Some(2.0));
    /// assert_eq!(Precedence::Longest.resolve(&seen), Some(4.0));
    /// assert_eq!(Precedence::Mean.resolve(&seen), Some(7.0 / 3.0));
    /// ```
    pub fn resolve(&self, observations: &[f64]) -> Option<f64> {
        match self {
            Precedence::Latest => observations.last().copied(),
            Precedence::Longest => observations.iter().copied().reduce(f64::max),
            Precedence::Mean => {
                if observations.is_empty() {
                    None
                } else {
                    Some(observations.iter().sum::<f64>() / observations.len() as f64)
                }
            }
        }
    }
}

/// Counters describing one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    /// Report files scanned.
    pub files: usize,

    /// Test-case records matched by the line pattern.
    pub records: usize,

    /// Catalog entries whose duration was replaced.
    pub updated: usize,

    /// Distinct reported tests that are no longer in the catalog.
    pub unmatched: usize,
}

/// Trait for replacing default durations with observed ones.
///
/// Implementations must adjust the catalog's running total by the delta of
/// every change, which [`Catalog::set_duration`] does.
pub trait DurationEstimator: Send + Sync {
    /// Updates durations in `catalog` in place.
    fn enrich(&self, catalog: &mut Catalog) -> ReportResult<EnrichStats>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}
