//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the orchestrator crates:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//! - No process-wide mutable singletons
//!
//! The helpers here collect the production portion of every source file, i.e.
//! everything before the first `#[cfg(test)]` line.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Source directories checked by the enforcement tests, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["orchestrator/core/src", "orchestrator/daemon/src"];

/// Production lines of one source file
pub struct SourceFile {
    /// File path
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Parse a file's contents, dropping test modules
    pub fn from_content(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|line| line.trim() != "#[cfg(test)]")
            .map(str::to_string)
            .collect();
        Self { path, lines }
    }

    /// Code part of a line, with `//` comments removed
    pub fn code(&self, idx: usize) -> &str {
        let line = &self.lines[idx];
        line.split("//").next().unwrap_or(line)
    }

    /// Format a violation at `idx`
    pub fn violation(&self, idx: usize) -> String {
        format!(
            "{}:{} - {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Workspace root, derived from this package's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All production sources under [`PRODUCTION_DIRS`]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(entry.path()) {
                files.push(SourceFile::from_content(entry.path().to_path_buf(), &content));
            }
        }
    }

    files
}

/// Report violations and panic if there are any
pub fn fail_on_violations(title: &str, violations: &[String], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ CRITICAL: {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in guidance {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_modules_are_dropped() {
        let file = SourceFile::from_content(
            PathBuf::from("x.rs"),
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn sleep() {}\n}\n",
        );

        assert_eq!(file.lines, vec!["fn a() {}".to_string()]);
    }

    #[test]
    fn test_workspace_root_contains_orchestrator() {
        assert!(workspace_root().join("orchestrator").exists());
    }
}
