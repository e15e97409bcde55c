//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Timing (flush debounce,
//! reconnect delay) is expressed as deadlines that the driver's `select!`
//! waits on, so commands and frames are never stuck behind a sleep.
//!
//! **Allowed**: `sleep_until` on a stored deadline, and test code.

use architectural_enforcement::{production_sources, Violation};

/// Test that production code does not call sleep
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Instead:");
        eprintln!("  - store an Instant deadline and wait with sleep_until in select!");
        eprintln!("  - use tokio::time::timeout for bounded waits");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line, code) in file.production_lines() {
            if let Some(what) = sleep_call(code) {
                violations.push(Violation {
                    path: file.path.clone(),
                    line,
                    what,
                    code: code.to_string(),
                });
            }
        }
    }

    violations
}

fn sleep_call(code: &str) -> Option<&'static str> {
    if code.contains("thread::sleep") {
        Some("Blocking thread sleep")
    } else if code.contains("::sleep(") || code.contains(".sleep(") {
        Some("Async sleep")
    } else {
        None
    }
}

#[test]
fn test_sleep_detection() {
    assert_eq!(
        sleep_call("tokio::time::sleep(Duration::from_millis(30)).await;"),
        Some("Async sleep")
    );
    assert_eq!(
        sleep_call("std::thread::sleep(Duration::from_secs(3));"),
        Some("Blocking thread sleep")
    );
    assert_eq!(sleep_call("tokio::time::sleep_until(deadline).await"), None);
    assert_eq!(sleep_call("let delay = policy.delay_for(attempt);"), None);
}
