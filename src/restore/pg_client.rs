// dbrestore/src/restore/pg_client.rs
use tracing::{debug, info};

use crate::errors::{RestoreError, Result};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::connection::PgConnection;

/// Field separator for tabular psql output; never appears in catalog names.
const FIELD_SEPARATOR: &str = "\u{1f}";

const SYSTEM_DATABASES: [&str; 3] = ["postgres", "template0", "template1"];

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Databases that must never be dropped by a restore.
pub fn is_protected_database(name: &str, admin_database: &str) -> bool {
    SYSTEM_DATABASES.iter().any(|s| s.eq_ignore_ascii_case(name)) || name.eq_ignore_ascii_case(admin_database)
}

/// psql-backed client for catalog queries and DDL against the target server.
pub struct PgClient<'a> {
    runner: &'a dyn CommandRunner,
    conn: &'a PgConnection,
}

impl<'a> PgClient<'a> {
    pub fn new(runner: &'a dyn CommandRunner, conn: &'a PgConnection) -> Self {
        Self { runner, conn }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    /// System databases and the admin database this client connects through.
    pub fn is_protected(&self, name: &str) -> bool {
        is_protected_database(name, &self.conn.admin_database)
    }

    /// Base psql invocation: no psqlrc, connection flags, password via environment.
    pub fn psql(&self, database: &str) -> CommandSpec {
        let mut spec = CommandSpec::new("psql")
            .arg("-X")
            .args(self.conn.cli_args())
            .args(["-d", database]);
        for (key, value) in self.conn.cli_env() {
            spec = spec.env(key, value);
        }
        spec
    }

    /// Base pg_restore invocation targeting `database`.
    pub fn pg_restore(&self, database: &str) -> CommandSpec {
        let mut spec = CommandSpec::new("pg_restore")
            .args(self.conn.cli_args())
            .args(["-d", database]);
        for (key, value) in self.conn.cli_env() {
            spec = spec.env(key, value);
        }
        spec
    }

    fn run_sql(&self, database: &str, sql: &str) -> Result<CommandOutput> {
        let spec = self
            .psql(database)
            .args(["-v", "ON_ERROR_STOP=1", "-A", "-t", "-F", FIELD_SEPARATOR, "-c", sql]);
        debug!("SQL on {}: {}", database, sql);
        let output = self.runner.run(&spec)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RestoreError::Command {
                stdout: output.stdout,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Runs a statement; output is discarded.
    pub fn execute(&self, database: &str, sql: &str) -> Result<()> {
        self.run_sql(database, sql).map(|_| ())
    }

    /// First line of the output, trimmed. Callers sanitise further as needed.
    pub fn query_scalar(&self, database: &str, sql: &str) -> Result<String> {
        let output = self.run_sql(database, sql)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string())
    }

    pub fn query_rows(&self, database: &str, sql: &str) -> Result<Vec<Vec<String>>> {
        let output = self.run_sql(database, sql)?;
        Ok(parse_rows(&output.stdout))
    }

    /// `SELECT 1` round trip. Any failure is a connectivity error.
    pub fn check_connection(&self, database: &str) -> Result<()> {
        let connectivity = |reason: String| RestoreError::Connectivity {
            database: database.to_string(),
            reason,
        };
        match self.query_scalar(database, "SELECT 1") {
            Ok(value) if value.trim_end_matches('\r') == "1" => Ok(()),
            Ok(value) => Err(connectivity(format!("unexpected reply to SELECT 1: '{}'", value))),
            Err(RestoreError::Command { stderr, .. }) => Err(connectivity(stderr)),
            Err(e) => Err(connectivity(e.to_string())),
        }
    }

    pub fn database_exists(&self, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = {})",
            quote_literal(name)
        );
        let value = self.query_scalar(&self.conn.admin_database, &sql)?;
        Ok(value.starts_with('t'))
    }

    /// Non-template databases on the server, excluding the admin database.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let rows = self.query_rows(
            &self.conn.admin_database,
            "SELECT datname FROM pg_database WHERE NOT datistemplate ORDER BY 1",
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter(|name| !self.is_protected(name))
            .collect())
    }

    pub fn create_database(&self, name: &str, owner: Option<&str>) -> Result<()> {
        info!("Creating database '{}'...", name);
        let mut sql = format!("CREATE DATABASE {}", quote_ident(name));
        if let Some(owner) = owner.filter(|o| !o.is_empty()) {
            sql.push_str(&format!(" OWNER {}", quote_ident(owner)));
        }
        self.execute(&self.conn.admin_database, &sql)?;
        info!("✓ Database '{}' created.", name);
        Ok(())
    }

    /// Terminates other sessions, then drops the database. System databases are refused.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        if self.is_protected(name) {
            return Err(RestoreError::InvalidInput(format!(
                "Refusing to drop '{}': it is a system or maintenance database",
                name
            )));
        }
        info!("Dropping database '{}'...", name);
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid()",
            quote_literal(name)
        );
        self.execute(&self.conn.admin_database, &terminate)?;
        self.execute(
            &self.conn.admin_database,
            &format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name)),
        )?;
        info!("✓ Database '{}' dropped.", name);
        Ok(())
    }
}

fn parse_rows(stdout: &str) -> Vec<Vec<String>> {
    stdout
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(FIELD_SEPARATOR).map(|f| f.trim().to_string()).collect())
        .collect()
}
