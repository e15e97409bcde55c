//! Architectural Enforcement
//!
//! Source scans run as integration tests (see `tests/`). They keep the
//! production code of the scribe crates free of patterns that break the
//! event-driven driver: sleeps, blocking I/O inside async code, and panicking
//! `unwrap`/`expect` calls.
//!
//! Only lines before a file's first `#[cfg(test)]` count as production code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["scribe/core/src", "scribe/watch/src"];

/// The workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One production source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Full file content
    pub content: String,
}

impl SourceFile {
    /// Production lines with comments stripped, as `(line number, code)`
    #[must_use]
    pub fn production_lines(&self) -> Vec<(usize, &str)> {
        production_lines(&self.content)
    }

    /// All lines of the file (for context lookups)
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }
}

/// Every `.rs` file under [`PRODUCTION_DIRS`]
///
/// # Panics
///
/// Panics if a production directory is missing, so a moved crate cannot make
/// the scans pass vacuously.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.is_dir(), "production directory missing: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(SourceFile {
                path: relative,
                content,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// Lines before the first `#[cfg(test)]`, comments removed, blanks skipped
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        let code = strip_comment(line).trim();
        if !code.is_empty() {
            lines.push((idx + 1, code));
        }
    }
    lines
}

/// Code part of a line (everything before `//` outside a string literal)
#[must_use]
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    let bytes = line.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Whether the line at `idx` (0-based) sits inside an `async fn` or `async` block
///
/// Scans backwards to the nearest function signature or async block opener.
#[must_use]
pub fn is_in_async_context(lines: &[&str], idx: usize) -> bool {
    for line in lines[..=idx.min(lines.len().saturating_sub(1))].iter().rev() {
        let code = strip_comment(line).trim();

        if code.contains("async fn ") || code.contains("async move {") || code.ends_with("async {")
        {
            return true;
        }
        if code.starts_with("fn ")
            || code.starts_with("pub fn ")
            || code.starts_with("pub(crate) fn ")
            || code.contains(" fn ")
        {
            return false;
        }
        if code.starts_with("mod ") || (code.starts_with("impl") && code.ends_with('{')) {
            return false;
        }
    }
    false
}

/// A rule violation found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was found
    pub what: &'static str,
    /// Offending code
    pub code: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.what,
            self.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n// note\n\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        assert_eq!(production_lines(content), vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_strip_comment_respects_strings() {
        assert_eq!(strip_comment("let u = \"ws://host\"; // tail"), "let u = \"ws://host\"; ");
        assert_eq!(strip_comment("//! doc"), "");
        assert_eq!(strip_comment("let s = \"a\\\"//b\";"), "let s = \"a\\\"//b\";");
    }

    #[test]
    fn test_async_context_detection() {
        let code = vec![
            "async fn run(&mut self) {",
            "    let x = std::fs::read(\"a\");",
            "}",
            "fn load() {",
            "    let x = std::fs::read(\"a\");",
            "}",
            "fn spawn() {",
            "    tokio::spawn(async move {",
            "        let x = std::fs::read(\"a\");",
            "    });",
            "}",
        ];
        assert!(is_in_async_context(&code, 1));
        assert!(!is_in_async_context(&code, 4));
        assert!(is_in_async_context(&code, 8));
    }

    #[test]
    fn test_workspace_root_contains_production_dirs() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "{dir} not found under {}", root.display());
        }
    }
}
