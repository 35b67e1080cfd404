// dbrestore/src/restore/db_restore.rs
use std::path::Path;

use tracing::{debug, info, warn};

use super::classify::{classify, error_excerpt};
use super::model::{DetectedDump, DumpFormat, ErrorCategory, RestoreOutcome, RestoreTarget, VerificationReport};
use super::ownership;
use super::pg_client::PgClient;
use super::verification::{require_passed, verify};
use crate::errors::{RestoreError, Result};
use crate::utils::command::CommandSpec;

const EXCERPT_LINES: usize = 5;

/// Server settings for the last SQL rung: function bodies referencing objects created later
/// in the script are accepted, and no server-side timeout cuts a long COPY short.
const RELAXED_SESSION_OPTIONS: &str = "-c check_function_bodies=off -c statement_timeout=0 \
     -c lock_timeout=0 -c idle_in_transaction_session_timeout=0";

/// Where a restore attempt chain currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    Preparing,
    Executing,
    Succeeded,
    OwnershipIssue,
    GeneralFailure,
    FatalFailure,
}

impl RestoreState {
    fn after(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::None | ErrorCategory::Recoverable => RestoreState::Succeeded,
            ErrorCategory::Ownership => RestoreState::OwnershipIssue,
            ErrorCategory::General => RestoreState::GeneralFailure,
            ErrorCategory::Fatal => RestoreState::FatalFailure,
        }
    }
}

/// What a completed restore looks like to the caller.
#[derive(Debug, Clone)]
pub struct RestoreSummary {
    pub report: VerificationReport,
    /// Label of the strategy whose output was accepted.
    pub strategy: String,
    /// True when the accepted attempt reported errors that were tolerated.
    pub with_warnings: bool,
}

/// One rung of the fallback ladder: commands run in order, all must hold.
struct Strategy {
    label: &'static str,
    commands: Vec<CommandSpec>,
}

/// Drives restore commands for one dump, then ownership fixes and verification.
pub struct RestoreExecutor<'c, 'a> {
    client: &'c PgClient<'a>,
    owner: String,
    state: RestoreState,
}

impl<'c, 'a> RestoreExecutor<'c, 'a> {
    pub fn new(client: &'c PgClient<'a>, owner: impl Into<String>) -> Self {
        Self {
            client,
            owner: owner.into(),
            state: RestoreState::Idle,
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    fn transition(&mut self, next: RestoreState) {
        debug!("Restore state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn run(&mut self, dump: &DetectedDump, target: &mut RestoreTarget) -> Result<RestoreSummary> {
        let database = target.database_name().to_string();

        self.transition(RestoreState::Preparing);
        if let Err(e) = self.prepare(dump, target) {
            self.transition(RestoreState::FatalFailure);
            return Err(e);
        }

        self.transition(RestoreState::Executing);
        let primary = self.primary_strategy(dump, &database);
        info!(
            "🔄 Restoring {} dump {} into '{}' ({})",
            dump.format,
            dump.path.display(),
            database,
            primary.label
        );
        let outcome = match self.attempt(&primary) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.transition(RestoreState::FatalFailure);
                return Err(e);
            }
        };
        self.transition(RestoreState::after(outcome.error_category));

        if self.state == RestoreState::FatalFailure {
            return Err(RestoreError::Fatal {
                message: format!("{} could not restore into '{}'", primary.label, database),
                stderr: outcome.stderr.trim().to_string(),
            });
        }

        // Exit codes alone are not trusted either way.
        let mut report = verify(self.client, &database)?;
        let mut strategy = primary.label.to_string();
        let with_warnings = outcome.error_category != ErrorCategory::None;

        if self.state == RestoreState::OwnershipIssue || !report.passed {
            ownership::normalize(self.client, &database, &self.owner);
            report = verify(self.client, &database)?;
        }

        if self.state == RestoreState::GeneralFailure && !report.passed {
            warn!("⚠️ Restore reported errors and verification failed, trying alternative strategies");
            match self.run_ladder(dump, &database) {
                Some(label) => {
                    strategy = label.to_string();
                    ownership::normalize(self.client, &database, &self.owner);
                    report = verify(self.client, &database)?;
                }
                None => {
                    self.transition(RestoreState::FatalFailure);
                    return Err(RestoreError::Fatal {
                        message: format!(
                            "{} failed for '{}' and every alternative strategy failed too",
                            primary.label, database
                        ),
                        stderr: outcome.stderr.trim().to_string(),
                    });
                }
            }
        } else if self.state == RestoreState::GeneralFailure {
            warn!("⚠️ Restore reported errors, but the database verified with tables present");
        }

        let context = vec![
            format!("Selected dump: {} ({} format)", dump.path.display(), dump.format),
            format!("Accepted strategy: {}", strategy),
        ];
        let report = match require_passed(&database, report, &context) {
            Ok(report) => report,
            Err(e) => {
                self.transition(RestoreState::GeneralFailure);
                return Err(e);
            }
        };
        self.transition(RestoreState::Succeeded);
        info!("✅ Restore of '{}' verified ({})", database, strategy);

        Ok(RestoreSummary {
            report,
            strategy,
            with_warnings,
        })
    }

    fn prepare(&self, dump: &DetectedDump, target: &mut RestoreTarget) -> Result<()> {
        if !dump_is_present(&dump.path) {
            return Err(RestoreError::EmptyDump(dump.path.clone()));
        }

        let database = target.database_name().to_string();
        let exists = self.client.database_exists(&database)?;
        if exists && !target.exists && target.create_policy.expects_fresh_database() {
            return Err(RestoreError::InvalidInput(format!(
                "Database '{}' appeared after it was chosen as a new database ({:?}); refusing to restore into it",
                database, target.create_policy
            )));
        }
        if !exists {
            self.client.create_database(&database, Some(&self.owner))?;
        }
        target.exists = true;
        Ok(())
    }

    fn primary_strategy(&self, dump: &DetectedDump, database: &str) -> Strategy {
        let path = dump.path.display().to_string();
        match dump.format {
            DumpFormat::Sql | DumpFormat::Unknown => Strategy {
                label: "psql (continue on error)",
                commands: vec![
                    self.client
                        .psql(database)
                        .args(["-v", "ON_ERROR_STOP=0", "-q", "-f"])
                        .arg(path),
                ],
            },
            DumpFormat::Custom | DumpFormat::Directory => Strategy {
                label: "pg_restore (clean, no owner)",
                commands: vec![
                    self.client
                        .pg_restore(database)
                        .args([
                            "--clean",
                            "--if-exists",
                            "--no-owner",
                            "--no-privileges",
                            "--no-security-labels",
                            "--no-tablespaces",
                            "--verbose",
                        ])
                        .arg(path),
                ],
            },
        }
    }

    /// Alternatives, most faithful first.
    fn fallback_strategies(&self, dump: &DetectedDump, database: &str) -> Vec<Strategy> {
        let path = dump.path.display().to_string();
        match dump.format {
            DumpFormat::Sql | DumpFormat::Unknown => vec![
                Strategy {
                    label: "psql (single transaction)",
                    commands: vec![
                        self.client
                            .psql(database)
                            .args(["-v", "ON_ERROR_STOP=0", "--single-transaction", "-q", "-f"])
                            .arg(path.clone()),
                    ],
                },
                Strategy {
                    label: "psql (autocommit, relaxed session checks)",
                    commands: vec![
                        self.client
                            .psql(database)
                            .args(["-v", "ON_ERROR_STOP=0", "-v", "AUTOCOMMIT=on", "-q", "-f"])
                            .arg(path)
                            .env("PGOPTIONS", RELAXED_SESSION_OPTIONS),
                    ],
                },
            ],
            DumpFormat::Custom | DumpFormat::Directory => {
                let base = || {
                    self.client
                        .pg_restore(database)
                        .args(["--no-owner", "--no-privileges", "--verbose"])
                };
                vec![
                    Strategy {
                        label: "pg_restore (minimal flags)",
                        commands: vec![base().arg(path.clone())],
                    },
                    Strategy {
                        label: "pg_restore (data only)",
                        commands: vec![base().arg("--data-only").arg(path.clone())],
                    },
                    Strategy {
                        label: "pg_restore (schema, then data)",
                        commands: vec![
                            base().arg("--schema-only").arg(path.clone()),
                            base().arg("--data-only").arg(path),
                        ],
                    },
                ]
            }
        }
    }

    /// Returns the label of the first strategy that holds, or `None` if all fail.
    fn run_ladder(&self, dump: &DetectedDump, database: &str) -> Option<&'static str> {
        for strategy in self.fallback_strategies(dump, database) {
            info!("🔁 Trying {}...", strategy.label);
            match self.attempt(&strategy) {
                Ok(outcome) if holds(outcome.error_category) => {
                    info!("✓ {} completed", strategy.label);
                    return Some(strategy.label);
                }
                Ok(outcome) => {
                    warn!("⚠️ {} failed ({:?})", strategy.label, outcome.error_category);
                }
                Err(e) => warn!("⚠️ {} could not run: {}", strategy.label, e),
            }
        }
        None
    }

    /// Runs every command of a strategy, stopping at the first one that does not hold.
    fn attempt(&self, strategy: &Strategy) -> Result<RestoreOutcome> {
        let mut last = None;
        for spec in &strategy.commands {
            debug!("Running restore command: {}", spec);
            let output = self.client.runner().run(spec)?;
            let error_category = classify(&output.stderr, &output.stdout, output.exit_code);
            let excerpt = error_excerpt(&output.stderr, EXCERPT_LINES);
            if !excerpt.is_empty() {
                warn!(
                    "{} exited with {} ({:?}); first errors:\n  {}",
                    spec.program,
                    output.exit_code,
                    error_category,
                    excerpt.join("\n  ")
                );
            }
            let outcome = RestoreOutcome {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                error_category,
            };
            let stop = !holds(error_category);
            last = Some(outcome);
            if stop {
                break;
            }
        }
        last.ok_or_else(|| RestoreError::InvalidInput(format!("strategy '{}' has no commands", strategy.label)))
    }
}

/// Outcomes a ladder rung may end with and still be accepted.
fn holds(category: ErrorCategory) -> bool {
    !matches!(category, ErrorCategory::Fatal | ErrorCategory::General)
}

fn dump_is_present(path: &Path) -> bool {
    if path.is_dir() {
        return std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
    }
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}
