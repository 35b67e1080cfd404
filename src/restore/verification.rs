// dbrestore/src/restore/verification.rs
use tracing::{info, warn};

use super::model::VerificationReport;
use super::pg_client::PgClient;
use crate::errors::{RestoreError, Result};

const USER_SCHEMA_FILTER: &str =
    "NOT IN ('pg_catalog', 'information_schema') AND {col} NOT LIKE 'pg_toast%' AND {col} NOT LIKE 'pg_temp%'";

const TOP_TABLES_LIMIT: usize = 10;

fn user_schemas(column: &str) -> String {
    format!("{} {}", column, USER_SCHEMA_FILTER.replace("{col}", column))
}

fn table_count_sql() -> String {
    format!(
        "SELECT count(*) FROM information_schema.tables WHERE table_type = 'BASE TABLE' AND {}",
        user_schemas("table_schema")
    )
}

// Statistics are usually empty right after a restore, so ranking is by on-disk size and the
// row figure is the larger of the planner estimate and the live tuple counter.
fn top_tables_sql() -> String {
    format!(
        "SELECT n.nspname || '.' || c.relname, \
         GREATEST(c.reltuples::bigint, COALESCE(s.n_live_tup, 0)) \
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
         LEFT JOIN pg_stat_user_tables s ON s.relid = c.oid \
         WHERE c.relkind IN ('r', 'p') AND {} \
         ORDER BY pg_total_relation_size(c.oid) DESC, 1 LIMIT {}",
        user_schemas("n.nspname"),
        TOP_TABLES_LIMIT
    )
}

fn top_tables_fallback_sql() -> String {
    format!(
        "SELECT table_schema || '.' || table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' AND {} ORDER BY 1 LIMIT {}",
        user_schemas("table_schema"),
        TOP_TABLES_LIMIT
    )
}

fn sequence_count_sql() -> String {
    format!(
        "SELECT count(*) FROM information_schema.sequences WHERE {}",
        user_schemas("sequence_schema")
    )
}

fn view_count_sql() -> String {
    format!(
        "SELECT count(*) FROM information_schema.views WHERE {}",
        user_schemas("table_schema")
    )
}

const SIZE_SQL: &str = "SELECT pg_size_pretty(pg_database_size(current_database()))";

/// Extracts the first run of digits from tool output. Output on some platforms carries
/// stray whitespace, carriage returns or a BOM around the number.
pub fn parse_count(raw: &str) -> Option<i64> {
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Checks the restored database. Only a failed connectivity check is an error; the
/// verdict is carried in `VerificationReport::passed`.
pub fn verify(client: &PgClient<'_>, database: &str) -> Result<VerificationReport> {
    info!("🔎 Verifying restored database '{}'...", database);
    client.check_connection(database)?;

    let table_count = match client.query_scalar(database, &table_count_sql()) {
        Ok(raw) => parse_count(&raw).unwrap_or_else(|| {
            warn!("⚠️ Could not parse table count from '{}'", raw.escape_debug());
            0
        }),
        Err(e) => {
            warn!("⚠️ Table count query failed: {}", e);
            0
        }
    };

    let top_tables = top_tables(client, database);

    let database_size_pretty = client
        .query_scalar(database, SIZE_SQL)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|e| {
            warn!("⚠️ Could not read database size: {}", e);
            "unknown".to_string()
        });

    let sequence_count = optional_count(client, database, &sequence_count_sql(), "sequence");
    let view_count = optional_count(client, database, &view_count_sql(), "view");

    let report = VerificationReport {
        table_count,
        sequence_count,
        view_count,
        database_size_pretty,
        top_tables,
        passed: table_count > 0,
    };
    log_report(database, &report);
    Ok(report)
}

fn optional_count(client: &PgClient<'_>, database: &str, sql: &str, what: &str) -> i64 {
    match client.query_scalar(database, sql) {
        Ok(raw) => parse_count(&raw).unwrap_or(0),
        Err(e) => {
            warn!("⚠️ Could not count {}s: {}", what, e);
            0
        }
    }
}

fn top_tables(client: &PgClient<'_>, database: &str) -> Vec<(String, Option<i64>)> {
    match client.query_rows(database, &top_tables_sql()) {
        Ok(rows) => rows
            .into_iter()
            .filter_map(|row| {
                let mut fields = row.into_iter();
                let name = fields.next()?;
                let rows = fields.next().and_then(|r| parse_count(&r));
                Some((name, rows))
            })
            .collect(),
        Err(e) => {
            warn!("⚠️ Detailed table listing failed ({}), using simple listing", e);
            client
                .query_rows(database, &top_tables_fallback_sql())
                .map(|rows| {
                    rows.into_iter()
                        .filter_map(|row| row.into_iter().next())
                        .map(|name| (name, None))
                        .collect()
                })
                .unwrap_or_else(|e| {
                    warn!("⚠️ Table listing failed: {}", e);
                    Vec::new()
                })
        }
    }
}

fn log_report(database: &str, report: &VerificationReport) {
    info!(
        "Database '{}': {} tables, {} sequences, {} views, size {}",
        database,
        report.table_count,
        report.sequence_count,
        report.view_count,
        report.database_size_pretty
    );
    for (name, rows) in &report.top_tables {
        match rows {
            Some(rows) => info!("   {:<48} ~{} rows", name, rows),
            None => info!("   {}", name),
        }
    }
}

/// Turns a failed verdict into an error listing what was checked and likely causes.
pub fn require_passed(database: &str, report: VerificationReport, context: &[String]) -> Result<VerificationReport> {
    if report.passed {
        return Ok(report);
    }
    let mut suggestions = vec![
        format!(
            "Checked: connectivity OK, {} tables, {} sequences, {} views, size {}",
            report.table_count, report.sequence_count, report.view_count, report.database_size_pretty
        ),
        "The dump may contain only global objects (roles, tablespaces) or only another database's schema".to_string(),
        "The restore may have stopped early; re-run with --verbose to see the full tool output".to_string(),
        "Tables may have been created under a role or schema the restore user cannot see".to_string(),
        "The archive may hold several dumps and a different file may be the real backup".to_string(),
    ];
    suggestions.extend(context.iter().cloned());
    for s in &suggestions {
        warn!("   • {}", s);
    }
    Err(RestoreError::VerificationFailed {
        database: database.to_string(),
        report,
        suggestions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::connection::PgConnection;
    use crate::utils::testing::{FakeRunner, exit, ok, sql_contains};

    fn conn() -> PgConnection {
        PgConnection::from_url("postgres://restore:pw@localhost/postgres").expect("valid url")
    }

    #[test]
    fn counts_are_sanitised() {
        assert_eq!(parse_count(" 12\r\n"), Some(12));
        assert_eq!(parse_count("\u{feff}7"), Some(7));
        assert_eq!(parse_count("count: 3 (1 row)"), Some(3));
        assert_eq!(parse_count("\r\n"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn passing_report_collects_everything() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new()
            .on(sql_contains("SELECT 1"), ok("1\n"))
            .on(sql_contains("table_type = 'BASE TABLE' AND table_schema"), ok(" 2\r\n"))
            .on(sql_contains("pg_stat_user_tables"), ok("public.orders\u{1f}120\npublic.users\u{1f}4\n"))
            .on(sql_contains("pg_size_pretty"), ok("8033 kB\n"))
            .on(sql_contains("information_schema.sequences"), ok("1\n"))
            .on(sql_contains("information_schema.views"), ok("0\n"));

        let report = verify(&PgClient::new(&runner, &conn), "orders")?;
        assert!(report.passed);
        assert_eq!(report.table_count, 2);
        assert_eq!(report.sequence_count, 1);
        assert_eq!(report.view_count, 0);
        assert_eq!(report.database_size_pretty, "8033 kB");
        assert_eq!(report.top_tables[0], ("public.orders".to_string(), Some(120)));
        Ok(())
    }

    #[test]
    fn largest_tables_rank_by_size_not_statistics() {
        let sql = top_tables_sql();
        assert!(sql.contains("ORDER BY pg_total_relation_size(c.oid) DESC"));
        assert!(sql.contains("c.reltuples"));
        assert!(!sql.contains("ORDER BY n_live_tup"));
    }

    #[test]
    fn secondary_failures_do_not_fail_verification() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new()
            .on(sql_contains("SELECT 1"), ok("1"))
            .on(sql_contains("pg_stat_user_tables"), exit(1, "ERROR: permission denied"))
            .on(sql_contains("ORDER BY 1 LIMIT"), ok("public.t\n"))
            .on(sql_contains("count(*) FROM information_schema.tables"), ok("1"))
            .on(sql_contains("information_schema.sequences"), exit(1, "ERROR: boom"))
            .on(sql_contains("information_schema.views"), exit(1, "ERROR: boom"))
            .on(sql_contains("pg_size_pretty"), exit(1, "ERROR: boom"));

        let report = verify(&PgClient::new(&runner, &conn), "orders")?;
        assert!(report.passed);
        assert_eq!(report.top_tables, vec![("public.t".to_string(), None)]);
        assert_eq!(report.sequence_count, 0);
        assert_eq!(report.database_size_pretty, "unknown");
        Ok(())
    }

    #[test]
    fn connectivity_failure_is_an_error() {
        let conn = conn();
        let runner = FakeRunner::new().on(sql_contains("SELECT 1"), exit(2, "could not connect to server"));
        let err = verify(&PgClient::new(&runner, &conn), "orders").unwrap_err();
        assert!(matches!(err, RestoreError::Connectivity { .. }));
    }

    #[test]
    fn empty_database_fails_with_suggestions() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new()
            .on(sql_contains("SELECT 1"), ok("1"))
            .on(sql_contains("count(*)"), ok("0"));

        let report = verify(&PgClient::new(&runner, &conn), "orders")?;
        assert!(!report.passed);

        let err = require_passed("orders", report, &["Selected dump: /tmp/x.sql".to_string()]).unwrap_err();
        match err {
            RestoreError::VerificationFailed { suggestions, report, .. } => {
                assert_eq!(report.table_count, 0);
                assert!(suggestions.iter().any(|s| s.contains("global objects")));
                assert!(suggestions.iter().any(|s| s.contains("/tmp/x.sql")));
            }
            other => panic!("expected VerificationFailed, got {:?}", other),
        }
        Ok(())
    }
}
