//! The worker polling loop.
//!
//! A worker takes buckets from the shared queue one at a time and hands each
//! to a [`BucketRunner`], the seam to whatever actually executes tests
//! (a device, an emulator, a local test command). The loop ends when the
//! queue is exhausted.
//!
//! Failed buckets are recorded in the summary and are not put back on the
//! queue.

pub mod command;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::discovery::TestIdentifier;
use crate::queue::{QueueError, SharedQueue, Take, read_bucket};

pub use command::CommandRunner;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while running buckets.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The queue could not be read.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The queue has never been cooked.
    #[error("Queue is not initialized")]
    NotInitialized,

    /// The runner could not start the bucket.
    #[error("Execution failed: {0}")]
    ExecFailed(String),

    /// The runner gave up on a bucket after its time limit.
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Runs the tests of one bucket.
///
/// # Example Implementation
///
/// ```
/// use std::path::Path;
/// use async_trait::async_trait;
/// use soup::discovery::TestIdentifier;
/// use soup::worker::{BucketRunner, WorkerResult};
///
/// struct DryRun;
///
/// #[async_trait]
/// impl BucketRunner for DryRun {
///     async fn run(&self, bucket: &Path, tests: &[TestIdentifier]) -> WorkerResult<bool> {
///         println!("{}: {} tests", bucket.display(), tests.len());
///         Ok(true)
///     }
///
///     fn name(&self) -> &'static str {
///         "dry-run"
///     }
/// }
/// ```
#[async_trait]
pub trait BucketRunner: Send + Sync {
    /// Runs `tests`, read from the bucket file at `bucket`.
    ///
    /// Returns `Ok(false)` when the tests ran but did not pass.
    async fn run(&self, bucket: &Path, tests: &[TestIdentifier]) -> WorkerResult<bool>;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;
}

/// What one worker did.
#[derive(Debug, Clone, Default)]
pub struct WorkerSummary {
    /// Buckets this worker claimed.
    pub buckets: usize,

    /// Tests in those buckets.
    pub tests: usize,

    /// Buckets whose run did not succeed.
    pub failed: Vec<PathBuf>,
}

impl WorkerSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drains the queue through one runner.
pub struct Worker<'a> {
    queue: &'a SharedQueue,
    runner: &'a dyn BucketRunner,
}

impl<'a> Worker<'a> {
    pub fn new(queue: &'a SharedQueue, runner: &'a dyn BucketRunner) -> Self {
        Self { queue, runner }
    }

    /// Takes and runs buckets until the queue is exhausted.
    ///
    /// Runner failures are recorded and the loop continues. Queue errors end
    /// the loop.
    pub async fn run(&self) -> WorkerResult<WorkerSummary> {
        let mut summary = WorkerSummary::default();

        loop {
            let bucket = match self.queue.take().await? {
                Take::Bucket(path) => path,
                Take::Exhausted => break,
                Take::NotInitialized => return Err(WorkerError::NotInitialized),
            };

            summary.buckets += 1;
            let tests = match read_bucket(&bucket) {
                Ok(tests) => tests,
                Err(e) => {
                    warn!("Failed to read bucket {}: {}", bucket.display(), e);
                    summary.failed.push(bucket);
                    continue;
                }
            };
            summary.tests += tests.len();

            info!(
                "{}: running {} ({} tests)",
                self.runner.name(),
                bucket.display(),
                tests.len()
            );
            match self.runner.run(&bucket, &tests).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Bucket failed: {}", bucket.display());
                    summary.failed.push(bucket);
                }
                Err(e) => {
                    warn!("Bucket {} not run: {}", bucket.display(), e);
                    summary.failed.push(bucket);
                }
            }
        }

        info!(
            "Queue exhausted: ran {} buckets ({} tests), {} failed",
            summary.buckets,
            summary.tests,
            summary.failed.len()
        );
        Ok(summary)
    }
}
