//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the core and the CLI MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io`, not `std::fs`, `std::net`, `std::io`
//!
//! Blocking calls are fine in synchronous functions that run before the
//! runtime starts (config loading) and in test code.

use architectural_enforcement::{scan_production, Line};

fn blocking_io_rule(line: &Line) -> Option<&'static str> {
    if line.in_test || !line.in_async {
        return None;
    }
    let code = &line.code;

    if code.contains("std::fs") {
        Some("Blocking file I/O")
    } else if code.contains("std::net") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout in async")
    } else {
        None
    }
}

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan_production(blocking_io_rule);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::io::stdout() with AsyncWriteExt");
        eprintln!("  - reqwest::Client (async)");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Test that the blocking HTTP client is never used
#[test]
fn test_no_blocking_http_client() {
    let violations = scan_production(|line| {
        (!line.in_test && line.code.contains("reqwest::blocking")).then_some("Blocking HTTP client")
    });

    assert!(
        violations.is_empty(),
        "reqwest::blocking in production code:\n{}",
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}

#[test]
fn test_rule_flags_blocking_read_in_async_fn() {
    let source = "\
async fn load() {
    let text = std::fs::read_to_string(\"a\");
}

fn load_sync() {
    let text = std::fs::read_to_string(\"a\");
}
";
    let flagged: Vec<usize> = architectural_enforcement::analyze(source)
        .iter()
        .filter(|line| blocking_io_rule(line).is_some())
        .map(|line| line.number)
        .collect();

    assert_eq!(flagged, vec![2]);
}
