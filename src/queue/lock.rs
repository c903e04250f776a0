//! Advisory lock acquisition for the shared queue file.
//!
//! Locks are `flock(2)`-style exclusive locks taken through [`fs2`]. They
//! belong to the open file description, so two handles opened separately on
//! the same path contend even inside one process.

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::time::Duration;

use fs2::FileExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{QueueError, QueueResult};
use crate::config::LockConfig;

/// How long and how hard to try for the queue lock.
///
/// Without a timeout, `retry_count` non-blocking attempts are made with
/// `retry_interval` between them, and then the caller blocks until the lock
/// is free. With a timeout, attempts continue until the deadline and the
/// call fails with [`QueueError::LockTimeout`]. The deadline covers the
/// whole acquisition.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use soup::queue::LockPolicy;
///
/// let policy = LockPolicy::default().with_timeout(Duration::from_secs(30));
/// assert_eq!(policy.retry_count, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::from_config(&LockConfig::default())
    }
}

impl LockPolicy {
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Takes the exclusive lock on `file`.
    ///
    /// The returned guard releases the lock when dropped. The future may be
    /// cancelled at any point: a blocking attempt still in flight releases
    /// the lock itself once it succeeds.
    pub async fn acquire<'a>(&self, file: &'a File) -> QueueResult<QueueLock<'a>> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut attempts: u32 = 0;

        loop {
            if try_lock(file)? {
                if attempts > 0 {
                    debug!("Acquired queue lock after {} retries", attempts);
                }
                return Ok(QueueLock { file });
            }
            attempts = attempts.saturating_add(1);

            match (deadline, self.timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(QueueError::LockTimeout(timeout));
                    }
                    tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
                }
                _ => {
                    if attempts >= self.retry_count {
                        break;
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }

        debug!("Queue lock still busy after {} attempts, blocking", attempts);
        let handle = file.try_clone()?;
        let pending = tokio::task::spawn_blocking(move || {
            FileExt::lock_exclusive(&handle)?;
            Ok::<_, io::Error>(PendingLock(Some(handle)))
        })
        .await
        .map_err(io::Error::other)??;
        pending.disarm();

        Ok(QueueLock { file })
    }
}

/// A lock taken on a background thread that nobody has claimed yet.
///
/// If the waiting future is gone by the time the lock is taken, the task
/// output is dropped and this releases the lock.
struct PendingLock(Option<File>);

impl PendingLock {
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for PendingLock {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            debug!("Releasing queue lock taken after its waiter left");
            if let Err(e) = FileExt::unlock(handle) {
                warn!("Failed to release abandoned queue lock: {}", e);
            }
        }
    }
}

/// Exclusive hold on the queue file. Unlocks on drop.
#[derive(Debug)]
pub struct QueueLock<'a> {
    file: &'a File,
}

impl Deref for QueueLock<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        self.file
    }
}

impl Drop for QueueLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            warn!("Failed to release queue lock: {}", e);
        }
    }
}

fn try_lock(file: &File) -> io::Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e)
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::path::Path;
    use tempfile::TempDir;

    fn open(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap()
    }

    fn quick_policy() -> LockPolicy {
        LockPolicy {
            retry_count: 3,
            retry_interval: Duration::from_millis(10),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_acquire_free_lock() {
        let temp_dir = TempDir::new().unwrap();
        let file = open(&temp_dir.path().join("soup"));

        let guard = quick_policy().acquire(&file).await.unwrap();
        drop(guard);

        // Released, so a second acquisition succeeds immediately.
        quick_policy().acquire(&file).await.unwrap();
    }

    #[tokio::test]
    async fn test_separate_handles_contend() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("soup");
        let first = open(&path);
        let second = open(&path);

        let _held = quick_policy().acquire(&first).await.unwrap();

        assert!(!try_lock(&second).unwrap());
    }

    #[tokio::test]
    async fn test_timeout_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("soup");
        let first = open(&path);
        let second = open(&path);
        let _held = quick_policy().acquire(&first).await.unwrap();

        let policy = quick_policy().with_timeout(Duration::from_millis(100));
        let result = policy.acquire(&second).await;

        assert!(matches!(
            result,
            Err(QueueError::LockTimeout(t)) if t == Duration::from_millis(100)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocks_until_released() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("soup");
        let first = open(&path);
        let second = open(&path);

        FileExt::lock_exclusive(&first).unwrap();
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            FileExt::unlock(&first).unwrap();
        });

        let guard = quick_policy().acquire(&second).await.unwrap();
        releaser.await.unwrap();
        drop(guard);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_blocking_acquire_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("soup");
        let first = open(&path);
        let second = open(&path);
        let third = open(&path);
        FileExt::lock_exclusive(&first).unwrap();

        let policy = LockPolicy {
            retry_count: 1,
            ..quick_policy()
        };
        let attempt = policy.acquire(&second);
        let waited = tokio::time::timeout(Duration::from_millis(50), attempt).await;
        assert!(waited.is_err());

        // The abandoned attempt takes the lock on `second` once it is free,
        // then has to give it back while `second` stays open.
        FileExt::unlock(&first).unwrap();
        let policy = quick_policy().with_timeout(Duration::from_secs(2));
        let guard = policy.acquire(&third).await.unwrap();

        drop(guard);
        drop(waited);
        drop(second);
    }

    #[test]
    fn test_policy_from_config() {
        let config = LockConfig {
            retry_count: 7,
            retry_interval_ms: 250,
            timeout_secs: Some(9),
        };
        let policy = LockPolicy::from_config(&config);
        assert_eq!(policy.retry_count, 7);
        assert_eq!(policy.retry_interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Some(Duration::from_secs(9)));
    }
}
