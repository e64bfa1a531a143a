//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors; it never unwraps them.
//! `unwrap()` and `expect()` are allowed in tests only.

use architectural_enforcement::scan_production;

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan_production(|line| {
        if line.in_test {
            None
        } else if line.code.contains(".unwrap()") {
            Some("unwrap() in production code")
        } else if line.code.contains(".expect(") {
            Some("expect() in production code")
        } else {
            None
        }
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Panicking shortcuts found in production code:\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!(
            "Found {} unwrap/expect call(s); propagate the error with `?` instead",
            violations.len()
        );
    }
}
