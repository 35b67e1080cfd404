// dbrestore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::restore::archive::ArchiveBackend;
use crate::utils::connection::PgConnection;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_DBEAVER_FOLDER: &str = "Restored";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Environment name -> bucket holding that environment's backups.
    #[serde(default)]
    pub environments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDbeaverConfig {
    pub enabled: Option<bool>,
    pub data_sources_path: Option<PathBuf>,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub target_database_url: Option<String>,
    pub restore_owner: Option<String>,
    pub temp_root: Option<PathBuf>,
    pub archive_backend: Option<ArchiveBackend>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub dbeaver: Option<JsonDbeaverConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    /// Wins over profiles when set.
    pub credentials: Option<StaticCredentials>,
    pub profiles: Vec<String>,
    pub environments: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbeaverConfig {
    pub enabled: bool,
    /// Overrides the per-OS default location of `data-sources.json`.
    pub data_sources_path: Option<PathBuf>,
    pub folder: String,
}

/// Validated settings, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub target: PgConnection,
    pub restore_owner: String,
    pub temp_root: Option<PathBuf>,
    pub archive_backend: ArchiveBackend,
    pub storage: Option<StorageConfig>,
    pub dbeaver: DbeaverConfig,
}

impl AppConfig {
    /// Reads `config_path`, or `config.json` when present, then applies environment overrides.
    /// An explicitly named file must exist; the default one may be absent.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let raw = match config_path {
            Some(path) => read_raw(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => read_raw(Path::new(DEFAULT_CONFIG_FILE))?,
            None => {
                debug!("No {} found, using environment only", DEFAULT_CONFIG_FILE);
                RawJsonConfig::default()
            }
        };
        Self::from_raw(raw, |key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    pub fn from_raw(raw: RawJsonConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let target_url = env("TARGET_DATABASE_URL")
            .or(raw.target_database_url)
            .filter(|s| !s.trim().is_empty())
            .context("target_database_url must be set in config.json or TARGET_DATABASE_URL")?;
        let target = PgConnection::from_url(&target_url).context("Invalid target_database_url")?;

        let restore_owner = env("RESTORE_OWNER")
            .or(raw.restore_owner)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| target.user.clone());

        let temp_root = env("DBRESTORE_TEMP_ROOT").map(PathBuf::from).or(raw.temp_root);

        let storage = build_storage(raw.s3_storage, env("AWS_PROFILE"));

        let raw_dbeaver = raw.dbeaver.unwrap_or_default();
        let dbeaver = DbeaverConfig {
            enabled: raw_dbeaver.enabled.unwrap_or(true),
            data_sources_path: env("DBEAVER_DATA_SOURCES")
                .map(PathBuf::from)
                .or(raw_dbeaver.data_sources_path),
            folder: raw_dbeaver
                .folder
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DBEAVER_FOLDER.to_string()),
        };

        Ok(AppConfig {
            target,
            restore_owner,
            temp_root,
            archive_backend: raw.archive_backend.unwrap_or_default(),
            storage,
            dbeaver,
        })
    }
}

fn read_raw(config_path: &Path) -> Result<RawJsonConfig> {
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
    serde_json::from_str(&config_content)
        .with_context(|| format!("Failed to parse JSON from config file at {}", config_path.display()))
}

fn build_storage(raw: Option<JsonS3StorageConfig>, env_profile: Option<String>) -> Option<StorageConfig> {
    if raw.is_none() && env_profile.is_none() {
        return None;
    }
    let raw = raw.unwrap_or_default();
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    let credentials = match (non_empty(raw.access_key_id), non_empty(raw.secret_access_key)) {
        (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
            access_key_id,
            secret_access_key,
        }),
        (None, None) => None,
        _ => {
            // Only one half of a key pair is as good as none.
            warn!("⚠️ s3_storage has only one of access_key_id/secret_access_key; falling back to AWS profiles.");
            None
        }
    };

    let mut profiles = raw.profiles;
    if let Some(profile) = env_profile {
        profiles.retain(|p| p != &profile);
        profiles.insert(0, profile);
    }

    Some(StorageConfig {
        region: non_empty(raw.region),
        endpoint_url: non_empty(raw.endpoint_url),
        credentials,
        profiles,
        environments: raw.environments,
    })
}
