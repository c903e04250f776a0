//! Runs a bucket through a shell command.
//!
//! The command template may contain `{bucket}`, which is replaced with the
//! shell-quoted bucket path. The child also gets:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `SOUP_BUCKET` | bucket file path |
//! | `SOUP_TEST_COUNT` | number of tests in the bucket |
//!
//! ```text
//! soup work --src-dir tests --workers 4 \
//!     --exec 'adb -s emulator-5554 shell am instrument -e testFile {bucket} ...'
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{BucketRunner, WorkerError, WorkerResult};
use crate::discovery::TestIdentifier;

/// [`BucketRunner`] that runs a shell command per bucket.
pub struct CommandRunner {
    template: String,
    shell: String,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Creates a runner for `template`, run with `/bin/sh -c`.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            shell: "/bin/sh".to_string(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Kills the command if a bucket takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command line for `bucket`.
    pub fn render(&self, bucket: &Path) -> String {
        let path = bucket.to_string_lossy();
        self.template.replace("{bucket}", &shell_words::quote(&path))
    }
}

#[async_trait]
impl BucketRunner for CommandRunner {
    async fn run(&self, bucket: &Path, tests: &[TestIdentifier]) -> WorkerResult<bool> {
        let shell_cmd = self.render(bucket);
        debug!("Running: {}", shell_cmd);

        let mut process = tokio::process::Command::new(&self.shell);
        process.arg("-c").arg(&shell_cmd);
        process.env("SOUP_BUCKET", bucket);
        process.env("SOUP_TEST_COUNT", tests.len().to_string());
        process.kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }

        let mut child = process
            .spawn()
            .map_err(|e| WorkerError::ExecFailed(format!("{}: {}", self.shell, e)))?;

        let status = if let Some(timeout) = self.timeout {
            tokio::time::timeout(timeout, child.wait())
                .await
                .map_err(|_| {
                    WorkerError::Timeout(format!(
                        "{} after {:?}",
                        bucket.display(),
                        timeout
                    ))
                })?
                .map_err(|e| WorkerError::ExecFailed(e.to_string()))?
        } else {
            child
                .wait()
                .await
                .map_err(|e| WorkerError::ExecFailed(e.to_string()))?
        };

        debug!("{} exited with {}", bucket.display(), status);
        Ok(status.success())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
