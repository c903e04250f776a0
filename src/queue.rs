//! The shared on-disk work queue.
//!
//! Worker processes on one host coordinate through a single plain-text file:
//! one absolute bucket-file path per line. Every read-modify-write of that
//! file happens under an exclusive advisory lock, which makes
//! [`SharedQueue::take`] an atomic pop-front across processes.
//!
//! # Lifecycle
//!
//! ```text
//!   soup clean                    (no workers running)
//!       │
//!       ▼
//!   queue file empty, no marker ──take──► NotInitialized
//!       │
//!       │ cook (first process to get the lock)
//!       ▼
//!   bucket paths queued, marker "ready" ──take──► Bucket(path)
//!       │
//!       │ take × buckets
//!       ▼
//!   queue file empty, marker "ready" ──take──► Exhausted
//! ```
//!
//! Every process calls [`cook`](SharedQueue::cook). The first one to take
//! the lock on an empty queue plans and writes the buckets; everyone else
//! sees a non-empty queue (or a `ready` marker) and returns
//! [`CookOutcome::AlreadyInitialized`]. If planning fails the queue is
//! truncated back to empty and a `failed` marker is left behind, which turns
//! every later `cook` and `take` into [`QueueError::InitializationFailed`]
//! until the queue is cleaned.

pub mod lock;
pub mod state;

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::discovery::TestIdentifier;
use crate::planner::Planner;

pub use lock::{LockPolicy, QueueLock};
pub use state::QueueState;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while cooking or taking from the queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// I/O error on the queue file, the marker or a bucket file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The lock policy's deadline passed before the lock was free.
    #[error("Timed out after {0:?} waiting for the queue lock")]
    LockTimeout(Duration),

    /// An earlier initialization pass failed; the queue holds no work.
    #[error("Queue initialization failed: {0}")]
    InitializationFailed(String),

    /// Discovery, enrichment or partitioning failed in this process.
    #[error("Planning failed: {0:#}")]
    Planning(anyhow::Error),

    /// The state marker could not be read or written.
    #[error("Corrupt queue state: {0}")]
    State(#[from] serde_json::Error),
}

/// What [`SharedQueue::cook`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookOutcome {
    /// This process planned the run and queued `buckets` bucket files.
    Initialized { buckets: usize, tests: usize },

    /// Another process (or an earlier call) already did.
    AlreadyInitialized,
}

/// What [`SharedQueue::take`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take {
    /// The claimed bucket file. No other caller will receive it.
    Bucket(PathBuf),

    /// All buckets have been handed out.
    Exhausted,

    /// Nobody has cooked this queue yet.
    NotInitialized,
}

/// A handle on the shared queue.
///
/// Each worker opens its own handle. Handles hold the queue file open but
/// only lock it for the duration of a `cook` or `take`.
///
/// # Example
///
/// ```no_run
/// use soup::config::Config;
/// use soup::planner::{PlanInputs, Planner};
/// use soup::queue::{LockPolicy, SharedQueue, Take};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = Config::default();
/// let inputs = PlanInputs { src_dir: "src/androidTest".into(), ..Default::default() };
/// let planner = Planner::from_config(&config, &inputs, 4);
///
/// let queue = SharedQueue::open(config.queue.clone(), LockPolicy::from_config(&config.lock))?;
/// queue.cook(&planner).await?;
/// while let Take::Bucket(path) = queue.take().await? {
///     println!("running {}", path.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SharedQueue {
    file: File,
    config: QueueConfig,
    lock: LockPolicy,
}

impl SharedQueue {
    /// Opens the queue file, creating it (and its parent directory) if
    /// missing. A newly created file is an uninitialized queue.
    pub fn open(config: QueueConfig, lock: LockPolicy) -> QueueResult<Self> {
        if let Some(parent) = config.queue_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.queue_file)?;

        debug!("Opened queue file: {}", config.queue_file.display());
        Ok(Self { file, config, lock })
    }

    pub fn path(&self) -> &Path {
        &self.config.queue_file
    }

    /// Initializes the queue unless it already is.
    ///
    /// The length check, planning, bucket flushing and marker write all
    /// happen under one hold of the lock, so exactly one racing process
    /// plans the run.
    pub async fn cook(&self, planner: &Planner) -> QueueResult<CookOutcome> {
        let guard = self.lock.acquire(&self.file).await?;

        if guard.metadata()?.len() > 0 {
            info!("Queue already initialized: {}", self.path().display());
            return Ok(CookOutcome::AlreadyInitialized);
        }

        match state::read_marker(self.path())? {
            Some(QueueState::Ready { .. }) => {
                info!("Queue already initialized and drained: {}", self.path().display());
                return Ok(CookOutcome::AlreadyInitialized);
            }
            Some(QueueState::Failed { reason, .. }) => {
                return Err(QueueError::InitializationFailed(reason));
            }
            None => {}
        }

        info!("Initializing queue: {}", self.path().display());
        match self.initialize(&guard, planner) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Queue initialization failed: {}", e);
                self.roll_back(&guard, &e);
                Err(e)
            }
        }
    }

    fn initialize(&self, file: &File, planner: &Planner) -> QueueResult<CookOutcome> {
        let plan = planner.plan_logged().map_err(QueueError::Planning)?;

        std::fs::create_dir_all(&self.config.work_dir)?;
        let work_dir = self.config.work_dir.canonicalize()?;

        let mut lines = String::new();
        for (i, bucket) in plan.buckets.iter().enumerate() {
            let path = work_dir.join(format!("{}{}", self.config.bucket_prefix, i));
            bucket.flush_to_file(&path)?;
            let line = path.to_str().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bucket path is not UTF-8: {}", path.display()),
                )
            })?;
            lines.push_str(line);
            lines.push('\n');
        }

        let mut writer = file;
        writer.seek(SeekFrom::End(0))?;
        writer.write_all(lines.as_bytes())?;
        writer.sync_all()?;

        state::write_marker(
            self.path(),
            &QueueState::ready(plan.buckets.len(), plan.tests, plan.total_secs),
        )?;

        info!(
            "Queued {} buckets for {} tests in {}",
            plan.buckets.len(),
            plan.tests,
            work_dir.display()
        );
        Ok(CookOutcome::Initialized {
            buckets: plan.buckets.len(),
            tests: plan.tests,
        })
    }

    fn roll_back(&self, file: &File, cause: &QueueError) {
        if let Err(e) = file.set_len(0) {
            warn!("Failed to truncate queue file after failed initialization: {}", e);
        }
        if let Err(e) = state::write_marker(self.path(), &QueueState::failed(cause.to_string())) {
            warn!("Failed to record failed initialization: {}", e);
        }
    }

    /// Removes and returns the first queued bucket path.
    pub async fn take(&self) -> QueueResult<Take> {
        let guard = self.lock.acquire(&self.file).await?;
        let mut file: &File = &guard;

        let mut content = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut content)?;

        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        let Some(first) = lines.next() else {
            return match state::read_marker(self.path())? {
                Some(QueueState::Ready { .. }) => Ok(Take::Exhausted),
                Some(QueueState::Failed { reason, .. }) => {
                    Err(QueueError::InitializationFailed(reason))
                }
                None => Ok(Take::NotInitialized),
            };
        };

        let remainder: String = lines.map(|l| format!("{}\n", l)).collect();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(remainder.as_bytes())?;
        file.sync_data()?;

        debug!("Took bucket: {}", first);
        Ok(Take::Bucket(PathBuf::from(first)))
    }

    /// Deletes the queue file and its marker and empties the bucket
    /// directory, keeping the directory itself.
    ///
    /// Not lock-protected: run it only while no workers are active.
    pub fn clean(config: &QueueConfig) -> QueueResult<()> {
        remove_file_if_exists(&config.queue_file)?;
        remove_file_if_exists(&state::marker_path(&config.queue_file))?;

        if config.work_dir.is_dir() {
            for entry in std::fs::read_dir(&config.work_dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)?;
                } else {
                    std::fs::remove_file(&path)?;
                }
            }
        }

        info!(
            "Cleaned {} and {}",
            config.queue_file.display(),
            config.work_dir.display()
        );
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Reads a bucket file back into test identifiers.
///
/// Blank lines are skipped; lines that do not name a test are logged and
/// skipped.
pub fn read_bucket(path: &Path) -> io::Result<Vec<TestIdentifier>> {
    let reader = BufReader::new(File::open(path)?);
    let mut tests = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<TestIdentifier>() {
            Ok(test) => tests.push(test),
            Err(e) => warn!("{}: {}", path.display(), e),
        }
    }
    Ok(tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::planner::PlanInputs;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        config: QueueConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let src = temp_dir.path().join("src");
            std::fs::create_dir_all(&src).unwrap();
            std::fs::write(
                src.join("LoginTest.java"),
                "package a;\npublic class LoginTest {\n public void testA() {}\n public void testB() {}\n public void testC() {}\n}\n",
            )
            .unwrap();
            std::fs::write(
                src.join("CartTest.java"),
                "package a;\npublic class CartTest {\n public void testD() {}\n public void testE() {}\n}\n",
            )
            .unwrap();

            let config = QueueConfig {
                queue_file: temp_dir.path().join("run/soup"),
                work_dir: temp_dir.path().join("testcase"),
                bucket_prefix: "testcase-".to_string(),
            };
            Self { temp_dir, config }
        }

        fn src_dir(&self) -> PathBuf {
            self.temp_dir.path().join("src")
        }

        fn planner(&self, workers: usize) -> Planner {
            let inputs = PlanInputs {
                src_dir: self.src_dir(),
                ..Default::default()
            };
            Planner::from_config(&Config::default(), &inputs, workers)
        }

        fn open(&self) -> SharedQueue {
            SharedQueue::open(self.config.clone(), policy()).unwrap()
        }

        fn queued_lines(&self) -> Vec<String> {
            std::fs::read_to_string(&self.config.queue_file)
                .unwrap()
                .lines()
                .map(String::from)
                .collect()
        }
    }

    fn policy() -> LockPolicy {
        LockPolicy {
            retry_count: 1000,
            retry_interval: Duration::from_millis(5),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_cook_writes_buckets() {
        let fixture = Fixture::new();
        let queue = fixture.open();

        let outcome = queue.cook(&fixture.planner(2)).await.unwrap();

        assert_eq!(outcome, CookOutcome::Initialized { buckets: 4, tests: 5 });
        let lines = fixture.queued_lines();
        assert_eq!(lines.len(), 4);
        let mut total = 0;
        for line in &lines {
            let path = Path::new(line);
            assert!(path.is_absolute());
            total += read_bucket(path).unwrap().len();
        }
        assert_eq!(total, 5);
        assert!(matches!(
            state::read_marker(queue.path()).unwrap(),
            Some(QueueState::Ready { buckets: 4, tests: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_cook_is_idempotent() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        queue.cook(&fixture.planner(2)).await.unwrap();
        let before = fixture.queued_lines();
        let contents: Vec<String> = before
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();

        std::fs::write(
            fixture.src_dir().join("NewTest.java"),
            "public class NewTest {\n public void testNew() {}\n}\n",
        )
        .unwrap();
        let other = fixture.open();
        let outcome = other.cook(&fixture.planner(3)).await.unwrap();

        assert_eq!(outcome, CookOutcome::AlreadyInitialized);
        assert_eq!(fixture.queued_lines(), before);
        let after: Vec<String> = before
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(after, contents);
    }

    #[tokio::test]
    async fn test_cook_after_drain_does_not_reinitialize() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        queue.cook(&fixture.planner(1)).await.unwrap();

        assert!(matches!(queue.take().await.unwrap(), Take::Bucket(_)));
        assert_eq!(queue.take().await.unwrap(), Take::Exhausted);

        let outcome = queue.cook(&fixture.planner(1)).await.unwrap();
        assert_eq!(outcome, CookOutcome::AlreadyInitialized);
        assert_eq!(queue.take().await.unwrap(), Take::Exhausted);
    }

    #[tokio::test]
    async fn test_take_in_order_then_exhausted() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        queue.cook(&fixture.planner(2)).await.unwrap();
        let expected = fixture.queued_lines();

        let mut taken = Vec::new();
        while let Take::Bucket(path) = queue.take().await.unwrap() {
            taken.push(path.to_string_lossy().into_owned());
        }

        assert_eq!(taken, expected);
        assert_eq!(queue.take().await.unwrap(), Take::Exhausted);
        assert!(fixture.queued_lines().is_empty());
    }

    #[tokio::test]
    async fn test_take_before_cook() {
        let fixture = Fixture::new();
        assert_eq!(fixture.open().take().await.unwrap(), Take::NotInitialized);
    }

    #[tokio::test]
    async fn test_take_skips_blank_lines() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        std::fs::write(&fixture.config.queue_file, "\n/tmp/a\n\n/tmp/b\n").unwrap();

        assert_eq!(queue.take().await.unwrap(), Take::Bucket(PathBuf::from("/tmp/a")));
        assert_eq!(fixture.queued_lines(), vec!["/tmp/b".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_cook_rolls_back() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        let inputs = PlanInputs {
            src_dir: fixture.temp_dir.path().join("missing"),
            ..Default::default()
        };
        let planner = Planner::from_config(&Config::default(), &inputs, 2);

        let result = queue.cook(&planner).await;

        assert!(matches!(result, Err(QueueError::Planning(_))));
        assert!(fixture.queued_lines().is_empty());
        assert!(matches!(
            queue.take().await,
            Err(QueueError::InitializationFailed(_))
        ));
        assert!(matches!(
            queue.cook(&fixture.planner(2)).await,
            Err(QueueError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back() {
        let fixture = Fixture::new();
        std::fs::write(&fixture.config.work_dir, "not a directory").unwrap();
        let queue = fixture.open();

        let result = queue.cook(&fixture.planner(2)).await;

        assert!(matches!(result, Err(QueueError::Io(_))));
        assert_eq!(std::fs::metadata(queue.path()).unwrap().len(), 0);
        assert!(matches!(
            state::read_marker(queue.path()).unwrap(),
            Some(QueueState::Failed { .. })
        ));
        assert!(matches!(
            queue.take().await,
            Err(QueueError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cook_writes_catalog_log() {
        let fixture = Fixture::new();
        let log = fixture.temp_dir.path().join("tests.log");
        let mut config = Config::default();
        config.discovery.catalog_log = Some(log.clone());
        let inputs = PlanInputs {
            src_dir: fixture.src_dir(),
            ..Default::default()
        };
        let planner = Planner::from_config(&config, &inputs, 2);
        let queue = fixture.open();

        planner.plan().unwrap();
        assert!(!log.exists());

        queue.cook(&planner).await.unwrap();
        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.lines().count(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cook_initializes_once() {
        let fixture = Arc::new(Fixture::new());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let fixture = Arc::clone(&fixture);
                tokio::spawn(async move {
                    let queue = fixture.open();
                    queue.cook(&fixture.planner(2)).await.unwrap()
                })
            })
            .collect();

        let outcomes: Vec<CookOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let initialized = outcomes
            .iter()
            .filter(|o| matches!(o, CookOutcome::Initialized { .. }))
            .count();
        assert_eq!(initialized, 1);
        assert_eq!(fixture.queued_lines().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_exactly_once() {
        const ENTRIES: usize = 40;
        const WORKERS: usize = 8;

        let fixture = Arc::new(Fixture::new());
        let seeded: String = (0..ENTRIES)
            .map(|i| format!("/buckets/testcase-{}\n", i))
            .collect();
        std::fs::create_dir_all(fixture.config.queue_file.parent().unwrap()).unwrap();
        std::fs::write(&fixture.config.queue_file, seeded).unwrap();
        let ready = QueueState::ready(ENTRIES, ENTRIES, 0.4);
        state::write_marker(&fixture.config.queue_file, &ready).unwrap();

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let fixture = Arc::clone(&fixture);
                tokio::spawn(async move {
                    let queue = fixture.open();
                    let mut mine = Vec::new();
                    loop {
                        match queue.take().await.unwrap() {
                            Take::Bucket(path) => mine.push(path),
                            Take::Exhausted => break,
                            Take::NotInitialized => panic!("queue reported uninitialized"),
                        }
                    }
                    mine
                })
            })
            .collect();

        let taken: Vec<PathBuf> = futures::future::join_all(handles)
            .await
            .into_iter()
            .flat_map(|r| r.unwrap())
            .collect();

        assert_eq!(taken.len(), ENTRIES);
        let unique: HashSet<_> = taken.iter().collect();
        assert_eq!(unique.len(), ENTRIES);
    }

    #[tokio::test]
    async fn test_cook_lock_timeout() {
        let fixture = Fixture::new();
        let holder = fixture.open();
        let _held = policy().acquire(&holder.file).await.unwrap();

        let config = fixture.config.clone();
        let queue = SharedQueue::open(
            config,
            LockPolicy {
                retry_count: 2,
                retry_interval: Duration::from_millis(10),
                timeout: Some(Duration::from_millis(50)),
            },
        )
        .unwrap();

        assert!(matches!(
            queue.cook(&fixture.planner(1)).await,
            Err(QueueError::LockTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_empties_work_dir() {
        let fixture = Fixture::new();
        let queue = fixture.open();
        queue.cook(&fixture.planner(2)).await.unwrap();
        drop(queue);

        SharedQueue::clean(&fixture.config).unwrap();

        assert!(!fixture.config.queue_file.exists());
        assert!(!state::marker_path(&fixture.config.queue_file).exists());
        assert!(fixture.config.work_dir.is_dir());
        assert_eq!(std::fs::read_dir(&fixture.config.work_dir).unwrap().count(), 0);

        // A clean queue can be cooked again.
        let queue = fixture.open();
        assert!(matches!(
            queue.cook(&fixture.planner(2)).await.unwrap(),
            CookOutcome::Initialized { .. }
        ));
    }

    #[test]
    fn test_clean_missing_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config = QueueConfig {
            queue_file: temp_dir.path().join("soup"),
            work_dir: temp_dir.path().join("testcase"),
            bucket_prefix: "testcase-".to_string(),
        };
        SharedQueue::clean(&config).unwrap();
    }

    #[test]
    fn test_read_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("testcase-0");
        std::fs::write(&path, "a.Foo\n\na.Foo#testBar\n#broken\n").unwrap();

        let tests = read_bucket(&path).unwrap();

        assert_eq!(tests.len(), 2);
        assert!(tests[0].is_whole_class());
        assert_eq!(tests[1].full_method_name(), "a.Foo#testBar");
    }
}
