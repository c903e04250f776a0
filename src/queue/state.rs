//! Initialization marker stored next to the queue file.
//!
//! The queue file alone cannot tell a drained queue from one that was never
//! cooked: both are empty. The marker records how the one initialization pass
//! ended. It is only written while the queue lock is held.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueueResult;

/// Outcome of the initialization pass, as recorded on disk.
///
/// ```json
/// {"status":"ready","buckets":4,"tests":5,"total_secs":0.05,"cooked_at":"...","pid":4242}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueueState {
    /// Buckets were written and queued.
    Ready {
        buckets: usize,
        tests: usize,
        total_secs: f64,
        cooked_at: DateTime<Utc>,
        pid: u32,
    },

    /// Initialization failed and the queue was rolled back.
    Failed {
        reason: String,
        cooked_at: DateTime<Utc>,
        pid: u32,
    },
}

impl QueueState {
    pub fn ready(buckets: usize, tests: usize, total_secs: f64) -> Self {
        QueueState::Ready {
            buckets,
            tests,
            total_secs,
            cooked_at: Utc::now(),
            pid: std::process::id(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        QueueState::Failed {
            reason: reason.into(),
            cooked_at: Utc::now(),
            pid: std::process::id(),
        }
    }
}

/// `<queue_file>.state`
pub fn marker_path(queue_file: &Path) -> PathBuf {
    let mut name = queue_file.as_os_str().to_owned();
    name.push(".state");
    PathBuf::from(name)
}

/// Reads the marker, or `None` if there is none.
pub fn read_marker(queue_file: &Path) -> QueueResult<Option<QueueState>> {
    match std::fs::read_to_string(marker_path(queue_file)) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_marker(queue_file: &Path, state: &QueueState) -> QueueResult<()> {
    let content = serde_json::to_string_pretty(state)?;
    std::fs::write(marker_path(queue_file), content)?;
    Ok(())
}
