//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production code of the async crates:
//! - No thread sleeps; waiting happens on I/O or tokio timers
//! - No blocking HTTP client
//! - No blocking stdin or file I/O inside async functions
//!
//! The scanning helpers live here so each rule's test file stays small.

use std::fs;
use std::path::{Path, PathBuf};

/// Source trees checked by every rule, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["chat/core/src", "chat/cli/src"];

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was violated
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under `dir`
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Lines of production code in a file
///
/// Test modules sit at the bottom of each file behind `#[cfg(test)]`;
/// everything from that marker on is dropped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect()
}

/// Strip a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Classify a function header: `Some(true)` for `async fn`, `Some(false)`
/// for a plain `fn`, `None` for anything else
#[must_use]
pub fn fn_header(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether line `idx` sits inside an `async fn`
///
/// Scans back to the nearest function header.
#[must_use]
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx].iter().rev() {
        if let Some(is_async) = fn_header(line) {
            return is_async;
        }
        let trimmed = line.trim();
        if trimmed.starts_with("mod ") || (trimmed.starts_with("impl") && trimmed.contains('{')) {
            return false;
        }
    }
    false
}

/// Run `rule` over every production line of every production file
///
/// `rule` receives the file's production lines and the index of the line
/// under test, and returns the rule name when the line violates it.
pub fn scan<F>(rule: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize) -> Option<&'static str>,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let lines = production_lines(&content);
            for idx in 0..lines.len() {
                if let Some(name) = rule(&lines, idx) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        rule: name,
                        text: lines[idx].trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

/// Panic with a readable report when `violations` is non-empty
pub fn assert_clean(violations: &[Violation], heading: &str, advice: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {heading}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in advice {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_header() {
        assert_eq!(fn_header("    pub async fn run(&self) {"), Some(true));
        assert_eq!(fn_header("pub(crate) fn helper() {"), Some(false));
        assert_eq!(fn_header("fn main() {"), Some(false));
        assert_eq!(fn_header("let f = async move {"), None);
    }

    #[test]
    fn test_async_detection() {
        let code = [
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
            "fn fine() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_test_module_is_dropped() {
        let content = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}"]);
    }

    #[test]
    fn test_comments_are_ignored() {
        assert_eq!(code_part("let x = 1; // std::thread::sleep"), "let x = 1; ");
    }

    #[test]
    fn test_production_dirs_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "missing {dir}");
            assert!(!rust_files(&root.join(dir)).is_empty());
        }
    }
}
