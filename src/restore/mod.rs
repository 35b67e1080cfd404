pub(crate) mod archive; // Archive unpacking and dump discovery
pub(crate) mod classify; // Tool output classification
pub(crate) mod db_restore; // Restore executor state machine
pub(crate) mod format; // Dump format sniffing
mod logic; // Orchestration: source, extraction, lifecycle, restore, integration
pub(crate) mod model;
pub(crate) mod ownership; // Post-restore ownership normalization
pub(crate) mod pg_client; // psql-backed catalog and DDL access
pub(crate) mod s3_download; // Backup listing and download from S3
pub(crate) mod verification; // Post-restore verification gate

use anyhow::Result;
use crate::config::AppConfig;
use crate::utils::command::SystemRunner;
use crate::utils::prompt::TerminalPrompt;

pub use logic::RestoreRequest;

/// Public entry point for the restore process: interactive prompts on the terminal,
/// real psql/pg_restore/tar through the system runner.
pub async fn run_restore_flow(app_config: &AppConfig, request: &RestoreRequest, assume_yes: bool) -> Result<()> {
    let runner = SystemRunner;
    let mut prompt = TerminalPrompt::new(assume_yes);
    let report = logic::perform_restore_orchestration(app_config, request, &mut prompt, &runner).await?;
    logic::print_summary(&report);
    Ok(())
}
