// dbrestore/src/utils/connection.rs
use percent_encoding::percent_decode_str;
use url::Url;

use crate::errors::{RestoreError, Result};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Connection parameters for the target server, split out of `TARGET_DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database used for create/drop/existence checks.
    pub admin_database: String,
}

impl PgConnection {
    pub fn from_url(db_url: &str) -> Result<Self> {
        let parsed = Url::parse(db_url)
            .map_err(|e| RestoreError::Config(format!("Invalid database URL format: {}", e)))?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(RestoreError::Config(format!(
                "Database URL must use the postgres:// scheme, got '{}://'",
                parsed.scheme()
            )));
        }

        let user = parsed.username();
        if user.is_empty() {
            return Err(RestoreError::Config(
                "Database URL must include a user name".to_string(),
            ));
        }

        let admin_database = match parsed.path().trim_start_matches('/') {
            "" => DEFAULT_ADMIN_DATABASE.to_string(),
            db => db.to_string(),
        };

        Ok(Self {
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            user: decode(user),
            password: parsed.password().map(decode),
            admin_database,
        })
    }

    /// `-h/-p/-U` arguments shared by psql and pg_restore.
    pub fn cli_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.host.clone(),
            "-p".to_string(),
            self.port.to_string(),
            "-U".to_string(),
            self.user.clone(),
        ]
    }

    /// Environment passed to child processes so the password never appears in argv.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        let mut env = vec![("PGCONNECT_TIMEOUT".to_string(), "10".to_string())];
        if let Some(password) = &self.password {
            env.push(("PGPASSWORD".to_string(), password.clone()));
        }
        env
    }

    pub fn jdbc_url(&self, database: &str) -> String {
        format!("jdbc:postgresql://{}:{}/{}", self.host, self.port, database)
    }
}

// Userinfo arrives percent-encoded; '+' is a literal character there.
fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}
