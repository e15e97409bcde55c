//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the scribe crates MUST NOT use blocking I/O. The
//! driver task shares the runtime with the caller; a blocking read stalls
//! every conversation.
//!
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`.
//! **Allowed**: blocking I/O in non-async functions (config loading before
//! the client starts) and test code.

use architectural_enforcement::{is_in_async_context, production_sources, Violation};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O calls found in async production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n❌ FORBIDDEN in async code:");
        eprintln!("  - std::fs::*, std::net::*");
        eprintln!("  - std::io::stdin(), std::io::stdout()");
        eprintln!("  - std::process::Command");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs, tokio::net, tokio::io::stdin()/stdout()");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (before the client starts)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in async production code.",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<Violation> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines = file.lines();
        for (line, code) in file.production_lines() {
            let Some(what) = blocking_call(code) else {
                continue;
            };
            if !is_in_async_context(&lines, line - 1) {
                continue;
            }
            violations.push(Violation {
                path: file.path.clone(),
                line,
                what,
                code: code.to_string(),
            });
        }
    }

    violations
}

fn blocking_call(code: &str) -> Option<&'static str> {
    if code.contains("std::fs::") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout")
    } else {
        None
    }
}

#[test]
fn test_blocking_call_detection() {
    assert_eq!(
        blocking_call("let content = std::fs::read_to_string(path)?;"),
        Some("Blocking file I/O")
    );
    assert_eq!(
        blocking_call("let line = std::io::stdin().read_line(&mut buf);"),
        Some("Blocking stdin/stdout")
    );
    assert_eq!(blocking_call(".with_writer(std::io::stderr)"), None);
    assert_eq!(blocking_call("let stdin = tokio::io::stdin();"), None);
}

#[test]
fn test_config_loading_is_outside_async_code() {
    let code = vec![
        "pub fn load_config_from_path(",
        "    path: Option<&Path>,",
        ") -> Result<ClientConfig, ConfigError> {",
        "    let content = match std::fs::read_to_string(config_path) {",
    ];
    assert!(!is_in_async_context(&code, 3));
}
