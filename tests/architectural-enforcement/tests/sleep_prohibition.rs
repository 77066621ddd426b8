//! Sleep Prohibition
//!
//! Production code waits on I/O or on the render tick, never on a timer it
//! picked itself. The one permitted timer is `sleep_until` on a render tick
//! deadline in the scheduler.

use architectural_enforcement::{code_part, describe, production_sources, SourceFile};

/// The file allowed to wait for a render tick
const TICK_OWNER: &str = "streaming/scheduler.rs";

fn sleep_violations(file: &SourceFile) -> Vec<String> {
    let mut violations = Vec::new();

    for (idx, line) in file.lines.iter().enumerate() {
        let code = code_part(line);

        if code.contains("::sleep(") || code.contains(".sleep(") {
            violations.push(describe(file, idx, "sleep"));
        }
        if code.contains("std::thread::sleep") || code.contains("thread::sleep(") {
            violations.push(describe(file, idx, "thread sleep"));
        }
        if code.contains("sleep_until(") && !file.is(TICK_OWNER) {
            violations.push(describe(file, idx, "sleep_until outside the render scheduler"));
        }
    }
    violations
}

#[test]
fn test_no_sleep_in_production_code() {
    let files = production_sources();
    assert!(!files.is_empty(), "no production sources found");

    let violations: Vec<String> = files.iter().flat_map(sleep_violations).collect();
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("  {violation}");
        }
        panic!("Found {} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_render_tick_is_the_only_timer() {
    let scheduler = production_sources()
        .into_iter()
        .find(|f| f.is(TICK_OWNER))
        .expect("scheduler source present");

    assert!(scheduler
        .lines
        .iter()
        .any(|l| code_part(l).contains("sleep_until(")));
}

#[test]
fn test_detector_flags_sleep() {
    let file = SourceFile::from_source(
        "hearth/core/src/controller.rs",
        "async fn poll() {\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n",
    );
    assert_eq!(sleep_violations(&file).len(), 1);

    let tick = SourceFile::from_source(
        "hearth/core/src/streaming/scheduler.rs",
        "async fn wait() {\n    tokio::time::sleep_until(deadline).await;\n}\n",
    );
    assert!(sleep_violations(&tick).is_empty());

    let tests_only = SourceFile::from_source(
        "hearth/core/src/controller.rs",
        "#[cfg(test)]\nmod tests {\n    fn t() { std::thread::sleep(d); }\n}\n",
    );
    assert!(sleep_violations(&tests_only).is_empty());
}
