//! Configuration loading and schema definitions for soup.
//!
//! This module provides types and functions for loading soup configuration
//! from TOML files or strings. Every section has defaults, so a missing
//! configuration file is equivalent to an empty one.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Loads soup configuration from a TOML file.
///
/// Paths inside the file have a leading `~` expanded to the home directory.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use soup::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("soup.toml"))?;
/// println!("Queue file: {}", config.queue.queue_file.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config.expand_paths())
}

/// Loads soup configuration from a TOML string.
///
/// Useful for testing and for generating configuration programmatically.
///
/// # Example
///
/// ```
/// use soup::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [lock]
///     retry_count = 5
///
///     [queue]
///     work_dir = "buckets"
/// "#)?;
///
/// assert_eq!(config.lock.retry_count, 5);
/// assert_eq!(config.queue.work_dir.to_str(), Some("buckets"));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config.expand_paths())
}

/// Loads the configuration at `path` if it exists, defaults otherwise.
///
/// The CLI uses this so that `soup.toml` stays optional.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!("No config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

pub(crate) fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
