//! Configuration schema definitions for soup.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every field has a default so that any subset of
//! the file may be given.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── QueueConfig            - Shared queue file and bucket directory
//! ├── LockConfig             - Advisory lock retry / timeout policy
//! ├── DiscoveryConfig        - Which files are scanned, catalog log
//! └── PartitionConfig        - Bucket doubling threshold, duration precedence
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::report::Precedence;

/// Root configuration structure for soup.
///
/// # TOML Structure
///
/// ```toml
/// [queue]
/// queue_file = "soup"
/// work_dir = "testcase"
///
/// [lock]
/// retry_count = 100
/// retry_interval_ms = 1000
///
/// [discovery]
/// source_extensions = ["java"]
///
/// [partition]
/// unknown_threshold_secs = 0.2
/// precedence = "latest"
/// ```
///
/// # Example
///
/// ```
/// use soup::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [queue]
///     queue_file = "/tmp/run/soup"
/// "#).unwrap();
/// assert_eq!(config.lock.retry_count, 100);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Shared queue location settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Lock acquisition policy for every queue operation.
    #[serde(default)]
    pub lock: LockConfig,

    /// Test discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Bucket partitioning settings.
    #[serde(default)]
    pub partition: PartitionConfig,
}

impl Config {
    pub(crate) fn expand_paths(mut self) -> Self {
        self.queue.queue_file = super::expand_path(&self.queue.queue_file);
        self.queue.work_dir = super::expand_path(&self.queue.work_dir);
        if let Some(log) = &self.discovery.catalog_log {
            self.discovery.catalog_log = Some(super::expand_path(log));
        }
        self
    }
}

/// Where the shared queue and its bucket files live.
///
/// All worker processes of one run must agree on these paths. Relative
/// paths resolve against each process's working directory.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `queue_file` | `"soup"` |
/// | `work_dir` | `"testcase"` |
/// | `bucket_prefix` | `"testcase-"` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// The shared queue file: one bucket-file path per line.
    ///
    /// An empty file means the queue has not been initialized yet.
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,

    /// Directory that receives the bucket files.
    ///
    /// Created on initialization, emptied by `soup clean`.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// File name prefix for bucket files; the bucket index is appended.
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            work_dir: default_work_dir(),
            bucket_prefix: default_bucket_prefix(),
        }
    }
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("soup")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("testcase")
}

fn default_bucket_prefix() -> String {
    "testcase-".to_string()
}

/// Advisory lock acquisition policy.
///
/// Each queue operation first tries to take the lock without blocking,
/// sleeping `retry_interval_ms` between attempts, up to `retry_count`
/// attempts. After that it either blocks until the lock is free or, when
/// `timeout_secs` is set, keeps polling until the deadline and then fails.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `retry_count` | 100 |
/// | `retry_interval_ms` | 1000 |
/// | `timeout_secs` | None (block forever after retries) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Number of non-blocking attempts before falling back.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Sleep between non-blocking attempts, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Hard limit on the whole acquisition, in seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_interval_ms: default_retry_interval_ms(),
            timeout_secs: None,
        }
    }
}

fn default_retry_count() -> u32 {
    100
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// Test discovery settings.
///
/// # Example
///
/// ```toml
/// [discovery]
/// source_extensions = ["java"]
/// report_extensions = ["xml"]
/// catalog_log = "tests.log"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// File extensions (without the dot) treated as test sources.
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// File extensions (without the dot) treated as historical reports.
    #[serde(default = "default_report_extensions")]
    pub report_extensions: Vec<String>,

    /// If set, the initializing process writes the sorted catalog here.
    pub catalog_log: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            source_extensions: default_source_extensions(),
            report_extensions: default_report_extensions(),
            catalog_log: None,
        }
    }
}

fn default_source_extensions() -> Vec<String> {
    vec!["java".to_string()]
}

fn default_report_extensions() -> Vec<String> {
    vec!["xml".to_string()]
}

/// Bucket partitioning settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `unknown_threshold_secs` | 0.2 |
/// | `precedence` | `latest` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionConfig {
    /// Mean per-test duration at or below which timings are treated as
    /// unknown and the bucket count is doubled.
    #[serde(default = "default_unknown_threshold")]
    pub unknown_threshold_secs: f64,

    /// How several observed durations for one test are combined.
    #[serde(default)]
    pub precedence: Precedence,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            unknown_threshold_secs: default_unknown_threshold(),
            precedence: Precedence::default(),
        }
    }
}

fn default_unknown_threshold() -> f64 {
    0.2
}
