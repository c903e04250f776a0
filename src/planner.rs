//! One planning pass: discover, enrich, sort, partition.
//!
//! The [`Planner`] is what the elected initializer runs while it holds the
//! queue lock, through [`Planner::plan_logged`]. [`Planner::catalog`] and
//! [`Planner::plan`] write nothing, so dry runs (`soup plan`, `soup collect`)
//! never touch shared state.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::list::TestListReader;
use crate::discovery::source::SourceScanner;
use crate::discovery::{Catalog, TestDiscoverer};
use crate::partition::{Bucket, Partitioner, compare_tests};
use crate::report::{DurationEstimator, JunitHistory};

/// Where a run's tests and history come from.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    /// Directory of test sources to scan.
    pub src_dir: PathBuf,

    /// Directory of JUnit reports from earlier runs.
    pub report_dir: Option<PathBuf>,

    /// Explicit `Class#name[#secs]` list, unioned with the source scan.
    pub test_list: Option<PathBuf>,
}

/// The result of a planning pass.
#[derive(Debug)]
pub struct Plan {
    /// Number of tests in the catalog.
    pub tests: usize,

    /// Catalog total after enrichment, in seconds.
    pub total_secs: f64,

    /// The buckets, in queue order.
    pub buckets: Vec<Bucket>,
}

/// Builds catalogs and bucket plans.
///
/// # Example
///
/// ```no_run
/// use soup::partition::Partitioner;
/// use soup::planner::Planner;
/// use soup::discovery::source::SourceScanner;
/// use soup::report::JunitHistory;
///
/// let planner = Planner::new(Partitioner::new(4))
///     .with_discoverer(Box::new(SourceScanner::new("src/androidTest")))
///     .with_estimator(Box::new(JunitHistory::new("reports")));
///
/// let plan = planner.plan()?;
/// for (i, bucket) in plan.buckets.iter().enumerate() {
///     println!("bucket {}: {} tests, {:.1}s", i, bucket.len(), bucket.total_secs());
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Planner {
    discoverers: Vec<Box<dyn TestDiscoverer>>,
    estimator: Option<Box<dyn DurationEstimator>>,
    partitioner: Partitioner,
    catalog_log: Option<PathBuf>,
}

impl Planner {
    /// Creates a planner with no inputs.
    pub fn new(partitioner: Partitioner) -> Self {
        Self {
            discoverers: Vec::new(),
            estimator: None,
            partitioner,
            catalog_log: None,
        }
    }

    /// Creates a planner from configuration and command-line inputs.
    pub fn from_config(config: &Config, inputs: &PlanInputs, workers: usize) -> Self {
        let partitioner = Partitioner::new(workers)
            .with_unknown_threshold(config.partition.unknown_threshold_secs);

        let mut planner = Planner::new(partitioner).with_discoverer(Box::new(
            SourceScanner::new(&inputs.src_dir)
                .with_extensions(config.discovery.source_extensions.clone()),
        ));

        if let Some(list) = &inputs.test_list {
            planner = planner.with_discoverer(Box::new(TestListReader::new(list)));
        }

        if let Some(report_dir) = &inputs.report_dir {
            planner = planner.with_estimator(Box::new(
                JunitHistory::new(report_dir)
                    .with_extensions(config.discovery.report_extensions.clone())
                    .with_precedence(config.partition.precedence),
            ));
        }

        if let Some(log) = &config.discovery.catalog_log {
            planner = planner.with_catalog_log(log);
        }

        planner
    }

    /// Adds a test source. Results of all discoverers are unioned.
    pub fn with_discoverer(mut self, discoverer: Box<dyn TestDiscoverer>) -> Self {
        self.discoverers.push(discoverer);
        self
    }

    /// Sets the duration estimator.
    pub fn with_estimator(mut self, estimator: Box<dyn DurationEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Writes the sorted catalog to `path` whenever [`Planner::plan_logged`] runs.
    pub fn with_catalog_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_log = Some(path.into());
        self
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Discovers, enriches and sorts the catalog.
    ///
    /// # Errors
    ///
    /// Fails if any discoverer or the estimator cannot read its input.
    pub fn catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();

        for discoverer in &self.discoverers {
            let found = discoverer
                .discover()
                .with_context(|| format!("{} discovery failed", discoverer.name()))?;
            info!("{}: discovered {} tests", discoverer.name(), found.len());
            catalog.extend(found);
        }

        if let Some(estimator) = &self.estimator {
            estimator
                .enrich(&mut catalog)
                .with_context(|| format!("{} enrichment failed", estimator.name()))?;
        }

        catalog.sort_by(compare_tests);
        Ok(catalog)
    }

    /// Runs a full pass and returns the buckets.
    pub fn plan(&self) -> Result<Plan> {
        Ok(self.partition(self.catalog()?))
    }

    /// Like [`Planner::plan`], but also writes the catalog log if one is set.
    ///
    /// A log that cannot be written is reported and does not fail the pass.
    pub fn plan_logged(&self) -> Result<Plan> {
        let catalog = self.catalog()?;
        if let Some(path) = &self.catalog_log
            && let Err(e) = write_catalog_log(path, &catalog)
        {
            warn!("Failed to write catalog log {}: {:#}", path.display(), e);
        }
        Ok(self.partition(catalog))
    }

    fn partition(&self, catalog: Catalog) -> Plan {
        let tests = catalog.len();
        let total_secs = catalog.total_secs();

        let buckets = self.partitioner.partition(catalog);
        info!(
            "Planned {} tests ({:.3}s) into {} buckets",
            tests,
            total_secs,
            buckets.len()
        );

        Plan {
            tests,
            total_secs,
            buckets,
        }
    }
}

fn write_catalog_log(path: &Path, catalog: &Catalog) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    for test in catalog.tests() {
        writeln!(writer, "Test: {}", test)?;
    }
    writer.flush()?;
    debug!("Wrote catalog log: {}", path.display());
    Ok(())
}
