// dbrestore/src/cli.rs
//! Command line flags. Every value left out is asked for interactively.

use clap::Parser;
use std::path::PathBuf;

use crate::restore::RestoreRequest;
use crate::restore::model::{CreatePolicy, SourceKind};

/// Restore a PostgreSQL database from a cloud or local backup
#[derive(Parser, Debug)]
#[command(name = "dbrestore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to ./config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where the backup comes from: cloud or local
    #[arg(long)]
    pub source: Option<SourceKind>,

    /// Local backup file or dump directory
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// AWS profile used for cloud listing and download
    #[arg(long)]
    pub profile: Option<String>,

    /// Environment name from s3_storage.environments
    #[arg(long)]
    pub environment: Option<String>,

    /// Service prefix in the bucket
    #[arg(long)]
    pub service: Option<String>,

    /// Backup object key or file name
    #[arg(long)]
    pub backup: Option<String>,

    /// Target database name
    #[arg(long)]
    pub database: Option<String>,

    /// Database lifecycle: dated, named, existing or replace
    #[arg(long)]
    pub policy: Option<CreatePolicy>,

    /// Answer yes to every confirmation, including dropping databases
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Register the restored database in DBeaver without asking
    #[arg(long, conflicts_with = "no_dbeaver")]
    pub dbeaver: bool,

    /// Never register the restored database in DBeaver
    #[arg(long)]
    pub no_dbeaver: bool,

    /// Debug logging, including every tool invocation
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub fn restore_request(&self) -> RestoreRequest {
        let dbeaver = match (self.dbeaver, self.no_dbeaver) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        RestoreRequest {
            source: self.source,
            file: self.file.clone(),
            profile: self.profile.clone(),
            environment: self.environment.clone(),
            service: self.service.clone(),
            backup: self.backup.clone(),
            database: self.database.clone(),
            policy: self.policy,
            dbeaver,
        }
    }
}
