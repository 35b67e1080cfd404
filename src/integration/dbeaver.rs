// dbrestore/src/integration/dbeaver.rs
//! Reads and updates DBeaver's `data-sources.json`.
//!
//! Only the `folders` and `connections` maps are touched; every other key in the
//! document is written back as it was read.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const WORKSPACE_SUFFIX: [&str; 4] = ["DBeaverData", "workspace6", "General", ".dbeaver"];
const DATA_SOURCES_FILE: &str = "data-sources.json";

/// Where DBeaver keeps its connection list for the default workspace on this OS.
pub fn default_data_sources_path() -> Option<PathBuf> {
    let base = if cfg!(target_os = "windows") {
        PathBuf::from(std::env::var_os("APPDATA")?)
    } else if cfg!(target_os = "macos") {
        PathBuf::from(std::env::var_os("HOME")?).join("Library")
    } else {
        PathBuf::from(std::env::var_os("HOME")?).join(".local").join("share")
    };
    let mut path = base;
    path.extend(WORKSPACE_SUFFIX);
    Some(path.join(DATA_SOURCES_FILE))
}

/// `postgres-jdbc-<hex millis>-<16 hex>`, the shape DBeaver itself generates.
pub fn generate_connection_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = uuid::Uuid::new_v4();
    format!("postgres-jdbc-{:x}-{}", millis, hex::encode(&random.as_bytes()[..8]))
}

/// Connection details written for a restored database. No password is ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub jdbc_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Created(String),
    Reused(String),
}

#[derive(Debug)]
pub struct DataSources {
    path: PathBuf,
    document: Map<String, Value>,
}

impl DataSources {
    /// Loads the document; a missing file starts from empty `folders`/`connections`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut document = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<Value>(&content)
                .with_context(|| format!("Failed to parse JSON from {}", path.display()))?
            {
                Value::Object(map) => map,
                _ => bail!("{} is not a JSON object", path.display()),
            }
        } else {
            Map::new()
        };

        for key in ["folders", "connections"] {
            let entry = document.entry(key).or_insert_with(|| json!({}));
            if !entry.is_object() {
                bail!("'{}' in {} is not a JSON object", key, path.display());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    #[cfg(test)]
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    fn section(&mut self, key: &str) -> Option<&mut Map<String, Value>> {
        self.document.get_mut(key).and_then(Value::as_object_mut)
    }

    pub fn upsert_folder(&mut self, folder: &str) {
        if let Some(folders) = self.section("folders") {
            folders.entry(folder).or_insert_with(|| {
                json!({
                    "id": folder,
                    "label": folder,
                    "description": "Databases restored from backups",
                })
            });
        }
    }

    /// Id of a connection already pointing at `host:port/database`.
    pub fn find_connection(&self, host: &str, port: u16, database: &str) -> Option<String> {
        let connections = self.document.get("connections")?.as_object()?;
        connections.iter().find_map(|(id, entry)| {
            let cfg = entry.get("configuration")?;
            let same_host = cfg.get("host")?.as_str()?.eq_ignore_ascii_case(host);
            let same_port = match cfg.get("port")? {
                Value::String(p) => p.trim() == port.to_string(),
                Value::Number(p) => p.as_u64() == Some(u64::from(port)),
                _ => false,
            };
            let same_db = cfg.get("database")?.as_str()? == database;
            (same_host && same_port && same_db).then(|| id.clone())
        })
    }

    /// Adds the connection under `folder`, or reuses one with the same host, port and database.
    pub fn upsert_connection(&mut self, entry: &ConnectionEntry, folder: &str) -> Upsert {
        self.upsert_folder(folder);
        if let Some(id) = self.find_connection(&entry.host, entry.port, &entry.database) {
            return Upsert::Reused(id);
        }

        let id = generate_connection_id();
        let record = json!({
            "provider": "postgresql",
            "driver": "postgres-jdbc",
            "name": entry.name,
            "save-password": false,
            "folder": folder,
            "configuration": {
                "host": entry.host,
                "port": entry.port.to_string(),
                "database": entry.database,
                "url": entry.jdbc_url,
                "configurationType": "MANUAL",
                "type": "dev",
                "auth-model": "native",
                "user": entry.user,
            }
        });
        if let Some(connections) = self.section("connections") {
            connections.insert(id.clone(), record);
        }
        Upsert::Created(id)
    }

    /// Writes to a temp file next to the target, then renames it into place.
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        let body = serde_json::to_string_pretty(&self.document)?;
        tmp.write_all(body.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(database: &str) -> ConnectionEntry {
        ConnectionEntry {
            name: format!("{} (localhost)", database),
            host: "localhost".to_string(),
            port: 5432,
            database: database.to_string(),
            user: "restore".to_string(),
            jdbc_url: format!("jdbc:postgresql://localhost:5432/{}", database),
        }
    }

    #[test]
    fn generated_ids_have_dbeaver_shape() {
        let id = generate_connection_id();
        let parts: Vec<&str> = id.rsplitn(2, '-').collect();
        assert!(id.starts_with("postgres-jdbc-"));
        assert_eq!(parts[0].len(), 16);
        assert!(parts[0].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_connection_id(), id);
    }

    #[test]
    fn missing_file_starts_empty_and_is_created_on_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("General").join(".dbeaver").join("data-sources.json");
        let mut sources = DataSources::load(&path)?;
        assert_eq!(sources.document().get("connections"), Some(&json!({})));

        let id = match sources.upsert_connection(&entry("orders_20240101"), "Restored") {
            Upsert::Created(id) => id,
            other => panic!("expected a new connection, got {:?}", other),
        };
        sources.save()?;

        let written: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        let record = &written["connections"][id.as_str()];
        assert_eq!(record["folder"], "Restored");
        assert_eq!(record["save-password"], false);
        assert_eq!(record["configuration"]["port"], "5432");
        assert!(record["configuration"].get("password").is_none());
        assert_eq!(written["folders"]["Restored"]["label"], "Restored");
        Ok(())
    }

    #[test]
    fn existing_entries_and_unknown_keys_survive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data-sources.json");
        fs::write(
            &path,
            serde_json::to_string(&json!({
                "folders": { "Prod": { "description": "live" } },
                "connections": {
                    "mysql-1": { "provider": "mysql", "configuration": { "host": "m", "port": "3306", "database": "x" } }
                },
                "connection-types": { "dev": { "name": "Development" } }
            }))?,
        )?;

        let mut sources = DataSources::load(&path)?;
        sources.upsert_connection(&entry("orders"), "Restored");
        sources.save()?;

        let written: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(written["folders"]["Prod"]["description"], "live");
        assert_eq!(written["connections"]["mysql-1"]["provider"], "mysql");
        assert_eq!(written["connection-types"]["dev"]["name"], "Development");
        assert_eq!(written["connections"].as_object().map(|m| m.len()), Some(2));
        Ok(())
    }

    #[test]
    fn same_host_port_database_is_reused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data-sources.json");
        fs::write(
            &path,
            serde_json::to_string(&json!({
                "folders": {},
                "connections": {
                    "postgres-jdbc-abc-0001": {
                        "configuration": { "host": "LOCALHOST", "port": 5432, "database": "orders" }
                    }
                }
            }))?,
        )?;

        let mut sources = DataSources::load(&path)?;
        assert_eq!(
            sources.upsert_connection(&entry("orders"), "Restored"),
            Upsert::Reused("postgres-jdbc-abc-0001".to_string())
        );
        assert!(matches!(sources.upsert_connection(&entry("orders_copy"), "Restored"), Upsert::Created(_)));
        Ok(())
    }

    #[test]
    fn malformed_documents_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data-sources.json");
        fs::write(&path, "[1, 2]")?;
        assert!(DataSources::load(&path).is_err());
        fs::write(&path, r#"{ "connections": [] }"#)?;
        assert!(DataSources::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn default_path_ends_in_workspace_file() {
        if let Some(path) = default_data_sources_path() {
            assert!(path.ends_with("DBeaverData/workspace6/General/.dbeaver/data-sources.json"));
        }
    }
}
