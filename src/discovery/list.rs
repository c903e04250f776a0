//! Explicit test list input.
//!
//! Each line names one test, optionally with a precomputed duration:
//!
//! ```text
//! com.example.LoginTest#testLogin
//! com.example.LoginTest#testLogout#4.25
//! ```
//!
//! Lines with fewer than two `#`-separated fields are skipped. A third field
//! that is not a finite, non-negative number leaves the default duration in
//! place.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::{DiscoveryError, DiscoveryResult, TestDiscoverer, TestIdentifier};

/// Reads tests from a `Class#name[#secs]` file.
pub struct TestListReader {
    path: PathBuf,
}

impl TestListReader {
    /// Creates a reader for the list at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TestDiscoverer for TestListReader {
    fn discover(&self) -> DiscoveryResult<Vec<TestIdentifier>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            DiscoveryError::DiscoveryFailed(format!(
                "cannot read test list {}: {}",
                self.path.display(),
                e
            ))
        })?;

        info!("Reading test list: {}", self.path.display());
        Ok(parse_test_list(&content))
    }

    fn name(&self) -> &'static str {
        "list"
    }
}

/// Parses the contents of a test list file.
pub fn parse_test_list(content: &str) -> Vec<TestIdentifier> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<TestIdentifier> {
    let mut fields: Vec<&str> = line.split('#').collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    if fields.len() < 2 {
        return None;
    }

    let mut test = TestIdentifier::new(fields[0], fields[1]);
    if let Some(raw) = fields.get(2) {
        match raw.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => test.duration_secs = secs,
            Ok(_) => warn!("Ignoring out-of-range duration {:?} in {:?}", raw, line),
            Err(e) => debug!("Bad duration {:?} in {:?}: {}", raw, line, e),
        }
    }
    debug!("Adding: {}", test);
    Some(test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DEFAULT_DURATION_SECS;
    use tempfile::TempDir;

    #[test]
    fn test_parse_with_and_without_duration() {
        let tests = parse_test_list("a.Foo#testBar\na.Foo#testBaz#4.25\n");

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].full_method_name(), "a.Foo#testBar");
        assert!((tests[0].duration_secs - DEFAULT_DURATION_SECS).abs() < f64::EPSILON);
        assert!((tests[1].duration_secs - 4.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_skips_short_lines() {
        let tests = parse_test_list("JustAClass\n\nFoo#\n#\nFoo#bar\n");
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].full_method_name(), "Foo#bar");
    }

    #[test]
    fn test_parse_bad_duration_keeps_default() {
        let tests = parse_test_list("Foo#bar#soon\n");
        assert_eq!(tests.len(), 1);
        assert!((tests[0].duration_secs - DEFAULT_DURATION_SECS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_non_finite_or_negative_duration_keeps_default() {
        let tests = parse_test_list("X#a#NaN\nX#b#inf\nX#c#-1.5\nX#d#0\n");

        assert_eq!(tests.len(), 4);
        for test in &tests[..3] {
            assert!((test.duration_secs - DEFAULT_DURATION_SECS).abs() < f64::EPSILON);
        }
        assert_eq!(tests[3].duration_secs, 0.0);
    }

    #[test]
    fn test_nan_duration_does_not_unbalance_buckets() {
        let catalog: crate::discovery::Catalog =
            parse_test_list("X#a#NaN\nX#b#5\nX#c#5\nX#d#5\n").into_iter().collect();
        assert!(catalog.total_secs().is_finite());

        let buckets = crate::partition::Partitioner::new(2).partition(catalog);

        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn test_parse_empty_method_is_whole_class() {
        let tests = parse_test_list("Foo##2.0\n");
        assert_eq!(tests.len(), 1);
        assert!(tests[0].is_whole_class());
        assert!((tests[0].duration_secs - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_crlf_lines() {
        let tests = parse_test_list("Foo#bar#1.5\r\nFoo#baz\r\n");
        assert_eq!(tests.len(), 2);
        assert!((tests[0].duration_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(tests[1].test_name, "baz");
    }

    #[test]
    fn test_discover_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tests.txt");
        std::fs::write(&path, "Foo#bar\nFoo#baz#3\n").unwrap();

        let tests = TestListReader::new(&path).discover().unwrap();
        assert_eq!(tests.len(), 2);
    }

    #[test]
    fn test_discover_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = TestListReader::new(temp_dir.path().join("none.txt")).discover();
        assert!(matches!(
            result,
            Err(DiscoveryError::DiscoveryFailed(msg)) if msg.contains("none.txt")
        ));
    }
}
