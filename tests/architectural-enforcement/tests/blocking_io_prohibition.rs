//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in the orchestrator crates MUST NOT use blocking
//! I/O. Use `tokio::fs`, `tokio::net` and the async `reqwest` client.
//! Synchronous helpers (such as configuration loading before the runtime
//! starts) may use `std::fs`, so the configuration loaders count as blocking
//! calls too.

use architectural_enforcement::{fail_on_violations, production_sources, SourceFile};

const BLOCKING_CALLS: &[&str] = &[
    "std::fs::",
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::thread::sleep",
    "reqwest::blocking",
    "load_config(",
    "load_config_from_path(",
    "load_config_with_overrides(",
    "load_config_with_env(",
];

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_functions() {
    let mut violations = Vec::new();
    for file in production_sources() {
        find_blocking_io_violations(&file, &mut violations);
    }

    fail_on_violations(
        "Blocking I/O calls found in async functions!",
        &violations,
        &[
            "❌ FORBIDDEN: std::fs, std::net sockets, reqwest::blocking inside async fn",
            "❌ FORBIDDEN: load_config* inside async fn (they read files synchronously)",
            "✅ REQUIRED: tokio::fs, tokio::net, async reqwest",
            "✅ REQUIRED: load configuration before the runtime starts",
        ],
    );
}

fn find_blocking_io_violations(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        let code = file.code(idx);
        if code.trim_start().starts_with("use ") {
            continue;
        }
        if BLOCKING_CALLS.iter().any(|call| code.contains(call)) && is_in_async_fn(file, idx) {
            violations.push(file.violation(idx));
        }
    }
}

/// Whether the nearest enclosing function header above `idx` is async
fn is_in_async_fn(file: &SourceFile, idx: usize) -> bool {
    for i in (0..=idx).rev() {
        let code = file.code(i);
        if code.contains("fn ") && code.contains('(') {
            return code.contains("async fn ");
        }
    }
    false
}

#[test]
fn test_blocking_io_detection() {
    let file = SourceFile::from_content(
        "io.rs".into(),
        "fn load() {\n    std::fs::read_to_string(p);\n}\n\nasync fn save() {\n    std::fs::write(p, b);\n}\n",
    );

    let mut violations = Vec::new();
    find_blocking_io_violations(&file, &mut violations);

    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("io.rs:6"));
}

#[test]
fn test_config_loading_inside_async_fn_is_flagged() {
    let file = SourceFile::from_content(
        "main.rs".into(),
        "fn main() {\n    let config = load_config_with_overrides(path, &overrides);\n}\n\n\
         async fn run() {\n    let config = load_config_with_overrides(path, &overrides);\n}\n",
    );

    let mut violations = Vec::new();
    find_blocking_io_violations(&file, &mut violations);

    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("main.rs:6"));
}
