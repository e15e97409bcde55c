//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: Production code propagates errors with `?` or handles them;
//! it MUST NOT call `.unwrap()` or `.expect(..)`. A panic in the driver task
//! would silently stop every subscriber.
//!
//! **Allowed**: `unwrap_or`, `unwrap_or_default`, `unwrap_or_else`, and test
//! code.

use architectural_enforcement::{production_sources, Violation};

/// Test that production code does not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    let violations: Vec<Violation> = production_sources()
        .into_iter()
        .flat_map(|file| {
            file.production_lines()
                .into_iter()
                .filter_map(|(line, code)| {
                    panicking_call(code).map(|what| Violation {
                        path: file.path.clone(),
                        line,
                        what,
                        code: code.to_string(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ unwrap/expect found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Instead: return a Result with `?`, or log and continue");

        panic!(
            "\nFound {} unwrap/expect call(s) in production code.",
            violations.len()
        );
    }
}

fn panicking_call(code: &str) -> Option<&'static str> {
    if code.contains(".unwrap()") {
        Some("unwrap")
    } else if code.contains(".expect(") {
        Some("expect")
    } else {
        None
    }
}

#[test]
fn test_panicking_call_detection() {
    assert_eq!(panicking_call("let id = raw.parse().unwrap();"), Some("unwrap"));
    assert_eq!(panicking_call("let x = y.expect(\"set\");"), Some("expect"));
    assert_eq!(panicking_call("let n = v.unwrap_or(0);"), None);
    assert_eq!(panicking_call("let s = v.unwrap_or_default();"), None);
}
