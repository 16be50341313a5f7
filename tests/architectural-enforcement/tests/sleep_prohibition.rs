//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the orchestrator crates MUST NOT call sleep
//! methods. Periodic work uses `tokio::time::interval`; waiting uses channels,
//! watch values or I/O readiness.

use architectural_enforcement::{fail_on_violations, production_sources, SourceFile};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();
    for file in production_sources() {
        find_sleep_violations(&file, &mut violations);
    }

    fail_on_violations(
        "Sleep calls found in production code!",
        &violations,
        &[
            "✅ ACCEPTABLE: tokio::time::interval() for periodic tasks, test code",
            "❌ FORBIDDEN: sleep in polling loops or as poor man's synchronization",
        ],
    );
}

fn find_sleep_violations(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        let code = file.code(idx);
        if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(") {
            violations.push(file.violation(idx));
        }
    }
}

#[test]
fn test_sleep_violation_detection() {
    // This test verifies that the detector itself works
    let file = SourceFile::from_content(
        "bad.rs".into(),
        "async fn poll() {\n    tokio::time::sleep(d).await;\n    // std::thread::sleep(d);\n}\n",
    );

    let mut violations = Vec::new();
    find_sleep_violations(&file, &mut violations);

    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("bad.rs:2"));
}
