// dbrestore/src/restore/model.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::errors::{RestoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Cloud,
    Local,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud" | "s3" => Ok(SourceKind::Cloud),
            "local" | "file" => Ok(SourceKind::Local),
            other => Err(format!("unknown source '{}', expected 'cloud' or 'local'", other)),
        }
    }
}

/// An input backup as selected by the user. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub source_kind: SourceKind,
}

impl BackupArtifact {
    pub fn from_local(path: &Path, source_kind: SourceKind) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            RestoreError::InvalidInput(format!("Cannot read backup '{}': {}", path.display(), e))
        })?;
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(Self {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            last_modified,
            source_kind,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Plain SQL script, restored with psql.
    Sql,
    /// pg_dump custom archive (PGDMP header), restored with pg_restore.
    Custom,
    /// pg_dump directory format (toc.dat + data files), restored with pg_restore.
    Directory,
    /// Matched by file name only; restored as SQL on a best-effort basis.
    Unknown,
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DumpFormat::Sql => "sql",
            DumpFormat::Custom => "custom",
            DumpFormat::Directory => "directory",
            DumpFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The dump file chosen for a restore. `priority`: lower is more preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDump {
    pub path: PathBuf,
    pub format: DumpFormat,
    pub priority: u32,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    CreateNewDated,
    CreateNewNamed,
    RestoreExisting,
    ReplaceExisting,
}

impl CreatePolicy {
    pub const ALL: [CreatePolicy; 4] = [
        CreatePolicy::CreateNewDated,
        CreatePolicy::CreateNewNamed,
        CreatePolicy::RestoreExisting,
        CreatePolicy::ReplaceExisting,
    ];

    /// Policies that promise the restore lands in a database nobody else is using.
    pub fn expects_fresh_database(&self) -> bool {
        !matches!(self, CreatePolicy::RestoreExisting)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CreatePolicy::CreateNewDated => "Create a new database named after the backup and today's date",
            CreatePolicy::CreateNewNamed => "Create a new database with a custom name",
            CreatePolicy::RestoreExisting => "Restore into an existing database (no drop)",
            CreatePolicy::ReplaceExisting => "Replace an existing database (drop and recreate)",
        }
    }
}

impl FromStr for CreatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dated" | "create-new-dated" => Ok(CreatePolicy::CreateNewDated),
            "named" | "create-new-named" => Ok(CreatePolicy::CreateNewNamed),
            "existing" | "restore-existing" => Ok(CreatePolicy::RestoreExisting),
            "replace" | "replace-existing" => Ok(CreatePolicy::ReplaceExisting),
            other => Err(format!(
                "unknown policy '{}', expected one of: dated, named, existing, replace",
                other
            )),
        }
    }
}

/// Destination database. The name is fixed at construction; only `exists` changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    database_name: String,
    pub create_policy: CreatePolicy,
    pub exists: bool,
}

impl RestoreTarget {
    pub fn new(database_name: impl Into<String>, create_policy: CreatePolicy, exists: bool) -> Self {
        Self {
            database_name: database_name.into(),
            create_policy,
            exists,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    None,
    /// Benign tool errors (objects already present, skip-on-missing).
    Recoverable,
    Ownership,
    Fatal,
    /// Nonzero exit with output matching none of the known patterns.
    General,
}

/// Result of one restore command. Each attempt is classified on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub error_category: ErrorCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub table_count: i64,
    pub sequence_count: i64,
    pub view_count: i64,
    pub database_size_pretty: String,
    /// Largest tables by on-disk size with a row estimate; `None` when only the fallback
    /// listing worked.
    pub top_tables: Vec<(String, Option<i64>)>,
    pub passed: bool,
}
