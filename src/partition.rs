//! Time-balanced bucket partitioning.
//!
//! The catalog is sorted so that whole-class entries come first and the rest
//! follow by descending duration. It is then cut greedily into `k` buckets
//! against a target that is recomputed every time a bucket closes:
//!
//! ```text
//! target = remaining / (k - index)
//! ```
//!
//! A bucket closes once its time reaches the target. The last bucket takes
//! whatever is left.
//!
//! When history is missing the catalog is dominated by default durations and
//! counts, not times, decide the balance. In that case (mean duration at or
//! below the unknown threshold) the bucket count is doubled so that a worker
//! that drew a slow bucket is less likely to hold up the run.
//!
//! # Example
//!
//! ```
//! use soup::discovery::{Catalog, TestIdentifier};
//! use soup::partition::Partitioner;
//!
//! let catalog: Catalog = ["A", "B", "C", "D", "E"]
//!     .iter()
//!     .map(|c| TestIdentifier::new(*c, "testIt"))
//!     .collect();
//!
//! let buckets = Partitioner::new(2).partition(catalog);
//! assert_eq!(buckets.len(), 4); // no history, so 2 workers get 4 buckets
//! assert_eq!(buckets.iter().map(|b| b.len()).sum::<usize>(), 5);
//! ```

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::discovery::{Catalog, TestIdentifier};

/// Mean duration at or below which timings are treated as unknown.
pub const DEFAULT_UNKNOWN_THRESHOLD_SECS: f64 = 0.2;

/// Partition ordering: whole-class entries first, then longest first.
///
/// Ties are left unordered.
pub fn compare_tests(a: &TestIdentifier, b: &TestIdentifier) -> Ordering {
    match (a.is_whole_class(), b.is_whole_class()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.duration_secs.total_cmp(&a.duration_secs),
    }
}

/// An ordered group of tests owned by one worker.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    tests: Vec<TestIdentifier>,
    total_secs: f64,
}

impl Bucket {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a test and adds its duration to the bucket time.
    pub fn feed(&mut self, test: TestIdentifier) {
        self.total_secs += test.duration_secs;
        self.tests.push(test);
    }

    pub fn tests(&self) -> &[TestIdentifier] {
        &self.tests
    }

    pub fn total_secs(&self) -> f64 {
        self.total_secs
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Writes one [`full_method_name`](TestIdentifier::full_method_name) per
    /// line to `path`, replacing any existing file.
    pub fn flush_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for test in &self.tests {
            writeln!(writer, "{}", test.full_method_name())?;
        }
        writer.flush()?;
        debug!(
            "Flushed {} tests ({:.3}s) to {}",
            self.tests.len(),
            self.total_secs,
            path.display()
        );
        Ok(())
    }
}

/// Splits a catalog into time-balanced buckets.
#[derive(Debug, Clone)]
pub struct Partitioner {
    workers: usize,
    unknown_threshold_secs: f64,
}

impl Partitioner {
    /// Creates a partitioner for `workers` parallel workers (at least 1).
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            unknown_threshold_secs: DEFAULT_UNKNOWN_THRESHOLD_SECS,
        }
    }

    /// Sets the mean duration below which timings count as unknown.
    pub fn with_unknown_threshold(mut self, secs: f64) -> Self {
        self.unknown_threshold_secs = secs;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of buckets [`partition`](Self::partition) will produce.
    ///
    /// An empty catalog has no mean, so it is never doubled.
    pub fn bucket_count(&self, catalog: &Catalog) -> usize {
        match catalog.mean_secs() {
            Some(mean) if mean <= self.unknown_threshold_secs && self.workers > 1 => {
                self.workers * 2
            }
            _ => self.workers,
        }
    }

    /// Sorts the catalog and cuts it into exactly
    /// [`bucket_count`](Self::bucket_count) buckets.
    ///
    /// Bucket times add up to the catalog total and every test lands in
    /// exactly one bucket. Trailing buckets may be empty.
    pub fn partition(&self, mut catalog: Catalog) -> Vec<Bucket> {
        let count = self.bucket_count(&catalog);
        let mut remaining = catalog.total_secs();
        catalog.sort_by(compare_tests);

        let mut buckets: Vec<Bucket> = (0..count).map(|_| Bucket::new()).collect();
        let mut target = remaining / count as f64;
        let mut index = 0;

        debug!(
            "Partitioning {} tests ({:.3}s) into {} buckets, target {:.3}s",
            catalog.len(),
            remaining,
            count,
            target
        );

        for test in catalog.into_tests() {
            buckets[index].feed(test);

            if buckets[index].total_secs() >= target && index < count - 1 {
                remaining -= buckets[index].total_secs();
                index += 1;
                target = remaining / (count - index) as f64;
            }
        }

        buckets
    }
}
