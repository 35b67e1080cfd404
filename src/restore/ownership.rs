// dbrestore/src/restore/ownership.rs
//! Reassigns ownership of everything in a restored database to the restore role.
//!
//! Dumps carry the source environment's role names. Every statement here is best effort:
//! failures are counted and logged, never returned.

use tracing::{debug, info, warn};

use super::pg_client::{PgClient, quote_ident};

const SYSTEM_SCHEMA_FILTER: &str =
    "NOT IN ('pg_catalog', 'information_schema') AND {col} NOT LIKE 'pg_toast%' AND {col} NOT LIKE 'pg_temp%'";

fn not_system(column: &str) -> String {
    format!("{} {}", column, SYSTEM_SCHEMA_FILTER.replace("{col}", column))
}

fn schemas_sql() -> String {
    format!("SELECT nspname FROM pg_namespace WHERE {} ORDER BY 1", not_system("nspname"))
}

fn tables_sql() -> String {
    format!("SELECT schemaname, tablename FROM pg_tables WHERE {} ORDER BY 1, 2", not_system("schemaname"))
}

fn sequences_sql() -> String {
    format!(
        "SELECT sequence_schema, sequence_name FROM information_schema.sequences WHERE {} ORDER BY 1, 2",
        not_system("sequence_schema")
    )
}

fn views_sql() -> String {
    format!(
        "SELECT table_schema, table_name FROM information_schema.views WHERE {} ORDER BY 1, 2",
        not_system("table_schema")
    )
}

// Plain functions and procedures only; aggregates and window functions reject ALTER ROUTINE.
// Extension members are skipped: their owner is managed by the extension.
fn functions_sql() -> String {
    format!(
        "SELECT n.nspname, p.proname, pg_get_function_identity_arguments(p.oid) \
         FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE {} AND p.prokind IN ('f', 'p') AND NOT EXISTS (SELECT 1 FROM pg_depend d WHERE d.objid = p.oid AND d.deptype = 'e') \
         ORDER BY 1, 2, 3",
        not_system("n.nspname")
    )
}

/// Tally of one normalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationSummary {
    pub applied: usize,
    pub failed: usize,
}

struct Pass<'c, 'a> {
    client: &'c PgClient<'a>,
    database: &'c str,
    summary: NormalizationSummary,
}

impl Pass<'_, '_> {
    fn apply(&mut self, sql: &str) {
        match self.client.execute(self.database, sql) {
            Ok(()) => {
                debug!("✓ {}", sql);
                self.summary.applied += 1;
            }
            Err(e) => {
                warn!("⚠️ Ownership statement failed: {} ({})", sql, e);
                self.summary.failed += 1;
            }
        }
    }

    fn list(&mut self, what: &str, sql: &str) -> Vec<Vec<String>> {
        match self.client.query_rows(self.database, sql) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("⚠️ Could not list {}: {}", what, e);
                self.summary.failed += 1;
                Vec::new()
            }
        }
    }
}

/// Runs all six steps in order: database, schemas, tables, sequences, views, functions.
pub fn normalize(client: &PgClient<'_>, database: &str, owner: &str) -> NormalizationSummary {
    info!("🔧 Normalizing ownership in '{}' to role '{}'...", database, owner);
    let owner_ident = quote_ident(owner);
    let db_ident = quote_ident(database);
    let mut pass = Pass {
        client,
        database,
        summary: NormalizationSummary::default(),
    };

    pass.apply(&format!("ALTER DATABASE {} OWNER TO {}", db_ident, owner_ident));
    pass.apply(&format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", db_ident, owner_ident));
    pass.apply(&format!("GRANT CREATE ON DATABASE {} TO {}", db_ident, owner_ident));

    for row in pass.list("schemas", &schemas_sql()) {
        let Some(schema) = row.first() else { continue };
        let schema = quote_ident(schema);
        pass.apply(&format!("ALTER SCHEMA {} OWNER TO {}", schema, owner_ident));
        pass.apply(&format!("GRANT ALL ON SCHEMA {} TO {}", schema, owner_ident));
        pass.apply(&format!("GRANT USAGE ON SCHEMA {} TO {}", schema, owner_ident));
    }
    pass.apply(&format!("GRANT ALL ON SCHEMA public TO {}", owner_ident));
    pass.apply(&format!("GRANT USAGE ON SCHEMA public TO {}", owner_ident));

    for row in pass.list("tables", &tables_sql()) {
        let Some(name) = qualified(&row) else { continue };
        pass.apply(&format!("ALTER TABLE {} OWNER TO {}", name, owner_ident));
        pass.apply(&format!("GRANT ALL ON TABLE {} TO {}", name, owner_ident));
    }

    for row in pass.list("sequences", &sequences_sql()) {
        let Some(name) = qualified(&row) else { continue };
        pass.apply(&format!("ALTER SEQUENCE {} OWNER TO {}", name, owner_ident));
        pass.apply(&format!("GRANT ALL ON SEQUENCE {} TO {}", name, owner_ident));
    }

    for row in pass.list("views", &views_sql()) {
        let Some(name) = qualified(&row) else { continue };
        pass.apply(&format!("ALTER VIEW {} OWNER TO {}", name, owner_ident));
    }

    for row in pass.list("functions", &functions_sql()) {
        let (Some(name), Some(args)) = (qualified(&row), row.get(2)) else { continue };
        pass.apply(&format!("ALTER ROUTINE {}({}) OWNER TO {}", name, args, owner_ident));
    }

    let summary = pass.summary;
    if summary.failed == 0 {
        info!("✅ Ownership normalized: {} statements applied", summary.applied);
    } else {
        warn!(
            "⚠️ Ownership normalized with issues: {} applied, {} failed",
            summary.applied, summary.failed
        );
    }
    summary
}

fn qualified(row: &[String]) -> Option<String> {
    match row {
        [schema, name, ..] => Some(format!("{}.{}", quote_ident(schema), quote_ident(name))),
        _ => None,
    }
}
