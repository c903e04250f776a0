//! JUnit report history.
//!
//! Reads test-case records from previously produced JUnit XML reports. Each
//! record must sit on one line with its attributes in this order:
//!
//! ```xml
//! <testcase classname="com.example.LoginTest" name="testLogin" time="3.5" />
//! ```
//!
//! This is a line-oriented pattern match, not an XML parser. A record split
//! across lines, or with `name` before `classname`, is not recognized.
//! Records for tests that are not in the catalog are ignored, as are
//! records whose `time` is not a finite, non-negative number.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{DurationEstimator, EnrichStats, Precedence, ReportError, ReportResult};
use crate::discovery::Catalog;

static TESTCASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"testcase\s+classname="([^"]+)"\s+name="([^"]*)"\s+time="([^"]*)""#)
        .expect("valid testcase pattern")
});

/// One matched `<testcase>` line.
#[derive(Debug, Clone, PartialEq)]
pub struct TestcaseRecord {
    /// The `classname` attribute.
    pub class_name: String,

    /// The `name` attribute.
    pub test_name: String,

    /// The `time` attribute in seconds.
    pub time_secs: f64,
}

/// Extracts a record from one report line.
///
/// Returns `None` when the line holds no record or its `time` is malformed;
/// the latter is logged.
pub fn parse_testcase_line(line: &str) -> Option<TestcaseRecord> {
    let caps = TESTCASE_RE.captures(line)?;
    match caps[3].trim().parse::<f64>() {
        Ok(time_secs) if time_secs.is_finite() && time_secs >= 0.0 => Some(TestcaseRecord {
            class_name: caps[1].to_string(),
            test_name: caps[2].to_string(),
            time_secs,
        }),
        Ok(_) => {
            warn!(
                "Ignoring out-of-range time {:?} for {}#{}",
                &caps[3], &caps[1], &caps[2]
            );
            None
        }
        Err(e) => {
            warn!(
                "Ignoring malformed time {:?} for {}#{}: {}",
                &caps[3], &caps[1], &caps[2], e
            );
            None
        }
    }
}

/// Duration estimator backed by a directory of JUnit XML reports.
///
/// # Example
///
/// ```no_run
/// use soup::discovery::{Catalog, TestIdentifier};
/// use soup::report::{DurationEstimator, JunitHistory, Precedence};
///
/// let mut catalog: Catalog = vec![TestIdentifier::new("Foo", "bar")].into_iter().collect();
/// let history = JunitHistory::new("build/reports").with_precedence(Precedence::Longest);
/// let stats = history.enrich(&mut catalog)?;
/// println!("updated {} tests", stats.updated);
/// # Ok::<(), soup::report::ReportError>(())
/// ```
pub struct JunitHistory {
    dir: PathBuf,
    extensions: Vec<String>,
    precedence: Precedence,
}

impl JunitHistory {
    /// Creates an estimator over `.xml` files under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: vec!["xml".to_string()],
            precedence: Precedence::default(),
        }
    }

    /// Replaces the set of file extensions treated as reports.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Sets how repeated observations are combined.
    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    fn is_report(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    /// Collects observations per `(classname, name)` in visiting order.
    fn collect(&self, stats: &mut EnrichStats) -> ReportResult<ObservationMap> {
        if !self.dir.is_dir() {
            return Err(ReportError::MissingDirectory(self.dir.display().to_string()));
        }

        info!("Scanning report dir: {}", self.dir.display());

        let mut observations = ObservationMap::default();
        for entry in WalkDir::new(&self.dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_report(path) {
                continue;
            }

            let file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Failed to open report {}: {}", path.display(), e);
                    continue;
                }
            };

            stats.files += 1;
            for line in BufReader::new(file).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Stopped reading {}: {}", path.display(), e);
                        break;
                    }
                };
                if let Some(record) = parse_testcase_line(&line) {
                    stats.records += 1;
                    observations.record(record);
                }
            }
            debug!("{}: scanned", path.display());
        }

        Ok(observations)
    }
}

impl DurationEstimator for JunitHistory {
    fn enrich(&self, catalog: &mut Catalog) -> ReportResult<EnrichStats> {
        let mut stats = EnrichStats::default();
        let observations = self.collect(&mut stats)?;

        for ((class_name, test_name), times) in observations.into_ordered() {
            let Some(secs) = self.precedence.resolve(&times) else {
                continue;
            };
            let updated = catalog.set_duration(&class_name, &test_name, secs);
            if updated == 0 {
                stats.unmatched += 1;
            } else {
                debug!("Setting {}#{} used time to {}", class_name, test_name, secs);
                stats.updated += updated;
            }
        }

        info!(
            "Enriched {} tests from {} records in {} reports ({} no longer present)",
            stats.updated, stats.records, stats.files, stats.unmatched
        );
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "junit"
    }
}

/// Observations keyed by identity, remembering first-seen order so that
/// enrichment is deterministic.
#[derive(Default)]
struct ObservationMap {
    order: Vec<(String, String)>,
    times: HashMap<(String, String), Vec<f64>>,
}

impl ObservationMap {
    fn record(&mut self, record: TestcaseRecord) {
        let key = (record.class_name, record.test_name);
        match self.times.get_mut(&key) {
            Some(times) => times.push(record.time_secs),
            None => {
                self.order.push(key.clone());
                self.times.insert(key, vec![record.time_secs]);
            }
        }
    }

    fn into_ordered(mut self) -> Vec<((String, String), Vec<f64>)> {
        self.order
            .into_iter()
            .filter_map(|key| self.times.remove(&key).map(|times| (key, times)))
            .collect()
    }
}
