//! Test source scanning.
//!
//! Walks a source tree and finds test methods with three line patterns:
//!
//! | Pattern | Example line | Effect |
//! |---------|--------------|--------|
//! | package | `package com.example.login;` | class name := `com.example.login` |
//! | class | `public class LoginTest extends TestCase {` | class name += `.LoginTest` |
//! | method | `public void testLogin() {` | emit `(class name, testLogin)` |
//!
//! The class name is reset for every file. This is a lexical scan, not a
//! parser: braces and scopes are not tracked, so a nested class or a second
//! top-level class keeps extending the same running name.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{DiscoveryError, DiscoveryResult, TestDiscoverer, TestIdentifier};

static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"public\s+void\s+(test[\w$]*)\s*\(").expect("valid method pattern")
});

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*package\s+([\w.]+)\s*;").expect("valid package pattern")
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"public\s+(?:(?:abstract|final|static)\s+)*class\s+([\w$]+)")
        .expect("valid class pattern")
});

/// Discovers test methods by scanning source files line by line.
///
/// # Example
///
/// ```no_run
/// use soup::discovery::TestDiscoverer;
/// use soup::discovery::source::SourceScanner;
///
/// let scanner = SourceScanner::new("app/src/androidTest");
/// let tests = scanner.discover()?;
/// println!("found {} tests", tests.len());
/// # Ok::<(), soup::discovery::DiscoveryError>(())
/// ```
pub struct SourceScanner {
    root: PathBuf,
    extensions: Vec<String>,
}

impl SourceScanner {
    /// Creates a scanner for `.java` files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["java".to_string()],
        }
    }

    /// Replaces the set of file extensions treated as test sources.
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    fn is_test_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

impl TestDiscoverer for SourceScanner {
    fn discover(&self) -> DiscoveryResult<Vec<TestIdentifier>> {
        if !self.root.is_dir() {
            return Err(DiscoveryError::DiscoveryFailed(format!(
                "source directory not found: {}",
                self.root.display()
            )));
        }

        info!("Scanning source dir: {}", self.root.display());

        let mut tests = Vec::new();
        let walker = WalkDir::new(&self.root).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !self.is_test_source(path) {
                debug!("{}: skipped", path.display());
                continue;
            }

            match File::open(path).and_then(|f| scan_source(BufReader::new(f))) {
                Ok(found) => {
                    debug!("{}: {} tests", path.display(), found.len());
                    tests.extend(found);
                }
                Err(e) => warn!("Failed to scan {}: {}", path.display(), e),
            }
        }

        Ok(tests)
    }

    fn name(&self) -> &'static str {
        "source"
    }
}

/// Scans one source file's lines and returns the tests it declares.
pub fn scan_source<R: BufRead>(reader: R) -> std::io::Result<Vec<TestIdentifier>> {
    let mut tests = Vec::new();
    let mut class_name = String::new();

    for line in reader.lines() {
        let line = line?;

        if let Some(caps) = METHOD_RE.captures(&line) {
            let test = TestIdentifier::new(class_name.clone(), &caps[1]);
            debug!("Adding: {}", test);
            tests.push(test);
        } else if let Some(caps) = PACKAGE_RE.captures(&line) {
            class_name = caps[1].to_string();
        } else if let Some(caps) = CLASS_RE.captures(&line) {
            if class_name.is_empty() {
                class_name = caps[1].to_string();
            } else {
                class_name = format!("{}.{}", class_name, &caps[1]);
            }
        }
    }

    Ok(tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const LOGIN_TEST: &str = r#"
package com.example.login;

import junit.framework.TestCase;

public class LoginTest extends TestCase {
    public void setUp() throws Exception {}

    public void testLogin() throws Exception {
        assertTrue(true);
    }

    public void testLogout(){
    }

    private void testHelper() {}
}
"#;

    fn scan(content: &str) -> Vec<TestIdentifier> {
        scan_source(Cursor::new(content)).unwrap()
    }

    #[test]
    fn test_scan_package_class_and_methods() {
        let tests = scan(LOGIN_TEST);

        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].full_method_name(), "com.example.login.LoginTest#testLogin");
        assert_eq!(tests[1].full_method_name(), "com.example.login.LoginTest#testLogout");
    }

    #[test]
    fn test_scan_without_package() {
        let tests = scan("public class Bare {\n  public void testIt() {}\n}\n");
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].class_name, "Bare");
    }

    #[test]
    fn test_scan_ignores_non_test_methods() {
        let tests = scan("package a;\npublic class B {\n public void run() {}\n public int testCount() { return 0; }\n}\n");
        assert!(tests.is_empty());
    }

    #[test]
    fn test_scan_final_class() {
        let tests = scan("package a;\npublic final class B {\n public void testX() {}\n}\n");
        assert_eq!(tests[0].full_method_name(), "a.B#testX");
    }

    #[test]
    fn test_scan_nested_class_extends_running_name() {
        let tests = scan(
            "package a;\npublic class Outer {\n public void testOuter() {}\n public static class Inner {\n  public void testInner() {}\n }\n}\n",
        );
        assert_eq!(tests[0].class_name, "a.Outer");
        assert_eq!(tests[1].class_name, "a.Outer.Inner");
    }

    #[test]
    fn test_discover_walks_tree_and_resets_per_file() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("com/example/login");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("LoginTest.java"), LOGIN_TEST).unwrap();
        std::fs::write(
            temp_dir.path().join("Plain.java"),
            "public class Plain {\n public void testPlain() {}\n}\n",
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "public void testNope() {}\n").unwrap();

        let tests = SourceScanner::new(temp_dir.path()).discover().unwrap();

        let names: Vec<_> = tests.iter().map(|t| t.full_method_name()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"com.example.login.LoginTest#testLogin".to_string()));
        assert!(names.contains(&"com.example.login.LoginTest#testLogout".to_string()));
        assert!(names.contains(&"Plain#testPlain".to_string()));
    }

    #[test]
    fn test_discover_custom_extensions() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("A.groovy"),
            "public class A {\n public void testA() {}\n}\n",
        )
        .unwrap();

        let scanner = SourceScanner::new(temp_dir.path()).with_extensions(vec!["groovy".into()]);
        assert_eq!(scanner.discover().unwrap().len(), 1);
    }

    #[test]
    fn test_discover_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = SourceScanner::new(temp_dir.path().join("missing")).discover();
        assert!(matches!(result, Err(DiscoveryError::DiscoveryFailed(_))));
    }
}
