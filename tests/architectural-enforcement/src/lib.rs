//! Architectural Enforcement
//!
//! Source scanning shared by the integration tests in `tests/`. They keep
//! the streaming pipeline honest about two rules:
//! - No sleeping in production code; the only timer is the render tick
//! - No blocking I/O inside async functions
//!
//! The scanners are line based. Everything from the first `#[cfg(test)]`
//! in a file onwards is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["hearth/core/src", "hearth/cli/src"];

/// One production source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path as found on disk
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from file contents
    pub fn from_source(path: impl Into<PathBuf>, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|l| !l.trim_start().starts_with("#[cfg(test)]"))
            .map(str::to_string)
            .collect();
        Self {
            path: path.into(),
            lines,
        }
    }

    /// Whether the path ends with the given components
    pub fn is(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }
}

/// Kind of function enclosing a line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
}

/// The workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All production `.rs` files
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                files.push(SourceFile::from_source(entry.path(), &content));
            }
        }
    }
    files
}

/// The code part of a line (line comments removed)
pub fn code_part(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") {
        return "";
    }
    line.split(" //").next().unwrap_or(line)
}

/// Whether a line declares a function
fn declares_fn(line: &str) -> Option<FnKind> {
    let code = code_part(line);
    let trimmed = code.trim_start();
    let is_decl = trimmed.starts_with("fn ")
        || trimmed.starts_with("async fn ")
        || (trimmed.starts_with("pub") && code.contains(" fn "))
        || (trimmed.starts_with("const ") && code.contains(" fn "))
        || (trimmed.starts_with("unsafe ") && code.contains(" fn "));
    if !is_decl {
        return None;
    }
    if code.contains("async fn ") {
        Some(FnKind::Async)
    } else {
        Some(FnKind::Sync)
    }
}

/// The nearest function declared at or above `idx`
pub fn enclosing_fn(lines: &[String], idx: usize) -> Option<FnKind> {
    lines[..=idx.min(lines.len().saturating_sub(1))]
        .iter()
        .rev()
        .find_map(|l| declares_fn(l))
}

/// `path:line - text` for a report
pub fn describe(file: &SourceFile, idx: usize, what: &str) -> String {
    format!(
        "{}:{} - {what}: {}",
        file.path.display(),
        idx + 1,
        file.lines[idx].trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_test_tail_is_dropped() {
        let file = SourceFile::from_source(
            "x.rs",
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n",
        );
        assert_eq!(file.lines, vec!["fn a() {}"]);
    }

    #[test]
    fn test_enclosing_fn_kinds() {
        let src = lines(&[
            "pub async fn load(&self) {",
            "    let x = 1;",
            "}",
            "pub(crate) fn parse(line: &str) {",
            "    let y = 2;",
            "}",
        ]);
        assert_eq!(enclosing_fn(&src, 1), Some(FnKind::Async));
        assert_eq!(enclosing_fn(&src, 4), Some(FnKind::Sync));
        assert_eq!(enclosing_fn(&lines(&["use std::fs;"]), 0), None);
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("    // std::fs::read"), "");
        assert_eq!(code_part("let a = 1; // sleep(1)"), "let a = 1;");
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
