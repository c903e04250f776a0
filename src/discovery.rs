//! Test discovery traits and implementations.
//!
//! This module defines the identity of a schedulable test, the catalog that
//! collects every candidate test with its estimated cost, and the
//! [`TestDiscoverer`] trait that feeds the catalog.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TestDiscoverer                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  SourceScanner::discover()   ──┐                                 │
//! │                                ├──► Catalog (tests + total time) │
//! │  TestListReader::discover()  ──┘                                 │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Results of several discoverers are unioned. The catalog does not drop
//! duplicate identities; that is left to whoever assembles the inputs.
//!
//! # Built-in Discoverers
//!
//! | Discoverer | Input | Method |
//! |------------|-------|--------|
//! | [`source::SourceScanner`] | Directory of test sources | Line-oriented pattern scan |
//! | [`list::TestListReader`] | `Class#name[#secs]` file | Line split on `#` |

pub mod list;
pub mod source;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Estimated duration assigned to a test with no recorded history.
pub const DEFAULT_DURATION_SECS: f64 = 0.01;

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors that can occur during test discovery.
///
/// Malformed lines inside an input are never errors; they are skipped. These
/// variants cover inputs that cannot be used at all.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The configured input does not exist or is not the expected kind.
    #[error("Failed to discover tests: {0}")]
    DiscoveryFailed(String),

    /// A string could not be turned into a test identifier.
    #[error("Invalid test identifier: {0:?}")]
    InvalidIdentifier(String),
}

/// One discoverable test and its estimated duration.
///
/// Identity is the `(class_name, test_name)` pair. The duration is metadata:
/// two identifiers with different durations compare equal and hash alike,
/// which lets report enrichment look tests up by identity alone.
///
/// An empty `test_name` stands for a whole class and always sorts ahead of
/// named tests when partitioning.
///
/// # Example
///
/// ```
/// use soup::discovery::TestIdentifier;
///
/// let method = TestIdentifier::new("com.example.LoginTest", "testLogin");
/// assert_eq!(method.full_method_name(), "com.example.LoginTest#testLogin");
///
/// let class = TestIdentifier::new("com.example.LoginTest", "");
/// assert_eq!(class.full_method_name(), "com.example.LoginTest");
/// assert!(class.is_whole_class());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestIdentifier {
    /// Fully qualified class name.
    pub class_name: String,

    /// Method name, or empty for a whole-class entry.
    pub test_name: String,

    /// Estimated cost in seconds.
    pub duration_secs: f64,
}

impl TestIdentifier {
    /// Creates an identifier with the default duration.
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
            duration_secs: DEFAULT_DURATION_SECS,
        }
    }

    /// Sets the estimated duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Returns `Class` for a whole-class entry, `Class#method` otherwise.
    ///
    /// This is the line format of bucket files.
    pub fn full_method_name(&self) -> String {
        if self.test_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}#{}", self.class_name, self.test_name)
        }
    }

    /// Whether this entry names a class rather than a single method.
    pub fn is_whole_class(&self) -> bool {
        self.test_name.is_empty()
    }

    /// Returns `true` if `class_name` and `test_name` identify this test.
    pub fn matches(&self, class_name: &str, test_name: &str) -> bool {
        self.class_name == class_name && self.test_name == test_name
    }
}

impl PartialEq for TestIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name && self.test_name == other.test_name
    }
}

impl Eq for TestIdentifier {}

impl Hash for TestIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_name.hash(state);
        self.test_name.hash(state);
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{:.6}",
            self.class_name, self.test_name, self.duration_secs
        )
    }
}

/// Parses a bucket-file line: `Class` or `Class#method`.
///
/// The duration is always the default; bucket files don't carry it.
impl FromStr for TestIdentifier {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DiscoveryError::InvalidIdentifier(s.to_string()));
        }
        match s.split_once('#') {
            Some((class, _)) if class.is_empty() => {
                Err(DiscoveryError::InvalidIdentifier(s.to_string()))
            }
            Some((class, method)) => Ok(TestIdentifier::new(class, method)),
            None => Ok(TestIdentifier::new(s, "")),
        }
    }
}

/// The full set of candidate tests and the running sum of their durations.
///
/// The total is maintained incrementally: pushing a test adds its duration,
/// and changing a duration adjusts the total by the delta. It is never
/// recomputed from scratch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    tests: Vec<TestIdentifier>,
    total_secs: f64,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a test and adds its duration to the total.
    pub fn push(&mut self, test: TestIdentifier) {
        self.total_secs += test.duration_secs;
        self.tests.push(test);
    }

    /// Returns the tests in their current order.
    pub fn tests(&self) -> &[TestIdentifier] {
        &self.tests
    }

    /// Returns the running total duration in seconds.
    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    /// Returns the number of tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if the catalog has no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Mean duration per test, or `None` for an empty catalog.
    pub fn mean_secs(&self) -> Option<f64> {
        if self.tests.is_empty() {
            None
        } else {
            Some(self.total_secs / self.tests.len() as f64)
        }
    }

    /// Sets the duration of every test with the given identity.
    ///
    /// Returns how many entries were updated; zero means the test is not in
    /// the catalog (it may have been deleted since the report was written).
    pub fn set_duration(&mut self, class_name: &str, test_name: &str, secs: f64) -> usize {
        let mut updated = 0;
        for test in self
            .tests
            .iter_mut()
            .filter(|t| t.matches(class_name, test_name))
        {
            self.total_secs = self.total_secs - test.duration_secs + secs;
            test.duration_secs = secs;
            updated += 1;
        }
        updated
    }

    /// Sorts the tests with `compare`, leaving the total untouched.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&TestIdentifier, &TestIdentifier) -> std::cmp::Ordering,
    {
        self.tests.sort_by(compare);
    }

    /// Consumes the catalog, returning its tests.
    pub fn into_tests(self) -> Vec<TestIdentifier> {
        self.tests
    }
}

impl Extend<TestIdentifier> for Catalog {
    fn extend<I: IntoIterator<Item = TestIdentifier>>(&mut self, iter: I) {
        for test in iter {
            self.push(test);
        }
    }
}

impl FromIterator<TestIdentifier> for Catalog {
    fn from_iter<I: IntoIterator<Item = TestIdentifier>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        catalog.extend(iter);
        catalog
    }
}

/// Trait for producing candidate tests.
///
/// Implementations are lexical heuristics over some input. They report
/// unusable inputs as errors and silently skip unusable lines.
///
/// # Thread Safety
///
/// Discoverers must be `Send + Sync` so a planner can be shared across tasks.
///
/// # Example Implementation
///
/// ```
/// use soup::discovery::{DiscoveryResult, TestDiscoverer, TestIdentifier};
///
/// struct Fixed(Vec<&'static str>);
///
/// impl TestDiscoverer for Fixed {
///     fn discover(&self) -> DiscoveryResult<Vec<TestIdentifier>> {
///         Ok(self.0.iter().map(|c| TestIdentifier::new(*c, "")).collect())
///     }
///
///     fn name(&self) -> &'static str {
///         "fixed"
///     }
/// }
/// ```
pub trait TestDiscoverer: Send + Sync {
    /// Returns every test found in this discoverer's input.
    fn discover(&self) -> DiscoveryResult<Vec<TestIdentifier>>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}
