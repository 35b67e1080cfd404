// dbrestore/src/restore/classify.rs
//! Classification of restore tool output.
//!
//! psql and pg_restore have no structured error channel, so attempts are judged from their
//! text output. Precedence: fatal, then ownership, then recoverable.

use std::sync::LazyLock;

use regex::RegexSet;

use super::model::ErrorCategory;

/// Nothing further can succeed once one of these shows up.
pub const FATAL_PATTERNS: &[&str] = &[
    r"(?i)password authentication failed",
    r"(?i)authentication failed for user",
    r"(?i)no password supplied",
    r"(?i)connection refused",
    r"(?i)could not connect to (the )?server",
    r"(?i)could not translate host name",
    r#"(?i)FATAL:\s+database "[^"]+" does not exist"#,
    r"(?i)syntax error at or near",
    r"(?i)could not open input file",
    r"(?i)No such file or directory",
];

/// Fixed by the ownership normalizer rather than by retrying.
pub const OWNERSHIP_PATTERNS: &[&str] = &[
    r"(?i)must be owner of",
    r"(?i)permission denied for",
    r#"(?i)role "[^"]+" does not exist"#,
    r"(?i)must be member of role",
    r"(?i)cannot drop .*owned by",
    r"(?i)must be superuser",
];

/// Benign: objects already present or skipped.
pub const RECOVERABLE_PATTERNS: &[&str] = &[
    r"(?i)already exists",
    r"(?i)does not exist, skipping",
    r"(?i)multiple primary keys for table",
    r"(?i)duplicate key value",
    r"(?i)duplicate (primary key|constraint)",
];

static FATAL: LazyLock<RegexSet> = LazyLock::new(|| build(FATAL_PATTERNS));
static OWNERSHIP: LazyLock<RegexSet> = LazyLock::new(|| build(OWNERSHIP_PATTERNS));
static RECOVERABLE: LazyLock<RegexSet> = LazyLock::new(|| build(RECOVERABLE_PATTERNS));

fn build(patterns: &[&str]) -> RegexSet {
    // Patterns are compile-time constants covered by tests.
    RegexSet::new(patterns).unwrap_or_else(|e| panic!("invalid classification pattern: {}", e))
}

/// Classifies one attempt from its combined output and exit code.
///
/// The first pattern set with a match decides. With no match at all the exit code does:
/// zero is a clean run, anything else is `General`. psql keeps going past failed statements
/// and can exit 0 with errors in its output; verification catches what this lets through.
pub fn classify(stderr: &str, stdout: &str, exit_code: i32) -> ErrorCategory {
    let combined = format!("{}\n{}", stderr, stdout);

    if FATAL.is_match(&combined) {
        ErrorCategory::Fatal
    } else if OWNERSHIP.is_match(&combined) {
        ErrorCategory::Ownership
    } else if RECOVERABLE.is_match(&combined) {
        ErrorCategory::Recoverable
    } else if exit_code == 0 {
        ErrorCategory::None
    } else {
        ErrorCategory::General
    }
}

fn error_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .filter(|line| line.contains("ERROR:") || line.contains("error:"))
}

/// First few error lines of an attempt, for log output.
pub fn error_excerpt(text: &str, limit: usize) -> Vec<String> {
    error_lines(text)
        .take(limit)
        .map(|l| l.trim().to_string())
        .collect()
}
