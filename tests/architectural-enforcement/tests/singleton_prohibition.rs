//! Integration Test: Process-Wide Singleton Prohibition
//!
//! **Policy**: Orchestrator state is explicitly constructed and shared by
//! handle. Production code MUST NOT keep mutable state in statics.

use architectural_enforcement::{fail_on_violations, production_sources, SourceFile};

const FORBIDDEN: &[&str] = &[
    "static mut ",
    "lazy_static!",
    "thread_local!",
    "OnceLock<",
    "OnceCell<",
    "LazyLock<",
    "Lazy<",
];

/// Test that production code has no global mutable state
#[test]
fn test_no_global_singletons() {
    let mut violations = Vec::new();
    for file in production_sources() {
        find_singleton_violations(&file, &mut violations);
    }

    fail_on_violations(
        "Process-wide singletons found in production code!",
        &violations,
        &[
            "❌ FORBIDDEN: static mut, lazy_static!, OnceLock/OnceCell/LazyLock statics",
            "✅ REQUIRED: construct state explicitly and pass Arc handles",
        ],
    );
}

fn find_singleton_violations(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        let code = file.code(idx);
        if FORBIDDEN.iter().any(|pattern| code.contains(pattern)) {
            violations.push(file.violation(idx));
        }
    }
}

#[test]
fn test_singleton_detection() {
    let file = SourceFile::from_content(
        "global.rs".into(),
        "static ROUTER: OnceLock<Router> = OnceLock::new();\nconst PREFIX: &str = \"cache:\";\n",
    );

    let mut violations = Vec::new();
    find_singleton_violations(&file, &mut violations);

    assert_eq!(
        violations,
        vec!["global.rs:1 - static ROUTER: OnceLock<Router> = OnceLock::new();".to_string()]
    );
}
