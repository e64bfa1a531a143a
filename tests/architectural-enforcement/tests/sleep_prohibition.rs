//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for something.
//! **Required**: Await the event itself (channels, `tokio::select!`,
//! `tokio::time::timeout` for deadlines).

use architectural_enforcement::scan_production;

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(|line| {
        if line.in_test {
            return None;
        }
        if line.code.contains("thread::sleep") {
            Some("Blocking sleep")
        } else if line.code.contains("time::sleep") {
            Some("Async sleep")
        } else {
            None
        }
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!("Found {} sleep call(s) in production code", violations.len());
    }
}
