//! Blocking I/O Prohibition
//!
//! Async functions must use `tokio::fs`, `tokio::net` and `tokio::io`.
//! Blocking calls are tolerated in plain functions that run before the
//! runtime does real work (configuration loading).

use architectural_enforcement::{
    code_part, describe, enclosing_fn, production_sources, FnKind, SourceFile,
};

const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "blocking file I/O"),
    ("std::net::", "blocking network I/O"),
    ("std::process::Command", "blocking process I/O"),
    ("reqwest::blocking", "blocking HTTP client"),
    ("std::io::stdin()", "blocking stdin"),
    ("std::io::stdout()", "blocking stdout"),
    (".read_line(", "blocking line read"),
];

fn blocking_violations(file: &SourceFile) -> Vec<String> {
    let mut violations = Vec::new();

    for (idx, line) in file.lines.iter().enumerate() {
        let code = code_part(line);

        if code.contains("reqwest::blocking") || code.contains("use std::fs") {
            violations.push(describe(file, idx, "blocking import"));
            continue;
        }
        if enclosing_fn(&file.lines, idx) != Some(FnKind::Async) {
            continue;
        }
        for (pattern, what) in BLOCKING {
            if code.contains(pattern) {
                violations.push(describe(file, idx, what));
            }
        }
    }
    violations
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(blocking_violations)
        .collect();

    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_detector_flags_async_fs() {
    let bad = SourceFile::from_source(
        "hearth/cli/src/main.rs",
        "async fn replay(path: &Path) {\n    let data = std::fs::read(path)?;\n}\n",
    );
    assert_eq!(blocking_violations(&bad).len(), 1);

    let startup = SourceFile::from_source(
        "hearth/core/src/config/mod.rs",
        "pub fn load(path: &Path) -> String {\n    std::fs::read_to_string(path).unwrap_or_default()\n}\n",
    );
    assert!(blocking_violations(&startup).is_empty());

    let stdin = SourceFile::from_source(
        "hearth/cli/src/session.rs",
        "pub async fn chat() {\n    std::io::stdin().read_line(&mut buf)?;\n}\n",
    );
    assert_eq!(blocking_violations(&stdin).len(), 2);
}
