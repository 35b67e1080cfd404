use std::path::PathBuf;

use thiserror::Error;

use crate::restore::model::VerificationReport;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required tool '{tool}' not found in PATH. Please ensure it is installed and in your PATH.")]
    MissingTool { tool: String },

    #[error("Command execution failed: {stderr}")]
    Command { stdout: String, stderr: String },

    #[error("Extraction failed for {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("No database dump found in {}. Extracted files: [{}]", root.display(), files.join(", "))]
    NoDumpFound { root: PathBuf, files: Vec<String> },

    #[error("Dump file is missing or empty: {}", .0.display())]
    EmptyDump(PathBuf),

    #[error("Cannot connect to database '{database}': {reason}")]
    Connectivity { database: String, reason: String },

    #[error("Restore failed fatally: {message}\nStderr: {stderr}")]
    Fatal { message: String, stderr: String },

    #[error("Verification failed for database '{database}': no tables found after restore")]
    VerificationFailed {
        database: String,
        report: VerificationReport,
        suggestions: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, RestoreError>;
