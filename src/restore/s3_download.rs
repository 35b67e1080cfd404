// dbrestore/src/restore/s3_download.rs
use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::model::{BackupArtifact, SourceKind};
use crate::config::StorageConfig;
use crate::utils::human_size;

/// Object suffixes offered as restorable backups.
pub const BACKUP_SUFFIXES: [&str; 10] = [
    ".sql", ".tar.gz", ".tgz", ".tar", ".gz", ".dump", ".dmp", ".pg_dump", ".backup", ".bak",
];

pub fn is_backup_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    !lower.ends_with('/') && BACKUP_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// A backup object as listed in the bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteBackup {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteBackup {
    /// Last path segment of the key; never empty and never a relative component.
    pub fn file_name(&self) -> &str {
        match self.key.rsplit('/').next() {
            Some(name) if !name.is_empty() && name != "." && name != ".." => name,
            _ => "backup",
        }
    }

    /// One menu line: name, size and upload time.
    pub fn label(&self) -> String {
        let when = self
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        format!("{}  ({}, {})", self.file_name(), human_size(self.size_bytes), when)
    }
}

pub fn sort_newest_first(backups: &mut [RemoteBackup]) {
    backups.sort_by(|a, b| b.last_modified.cmp(&a.last_modified).then_with(|| a.key.cmp(&b.key)));
}

/// `"orders-api/"` -> `"orders-api"`.
pub fn service_from_prefix(prefix: &str) -> Option<String> {
    let name = prefix.trim_end_matches('/');
    (!name.is_empty()).then(|| name.to_string())
}

pub fn to_chrono(value: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

/// Read access to one bucket of service backups (`<service>/<backup file>`).
pub struct BackupStore {
    client: s3::Client,
    bucket: String,
}

impl BackupStore {
    /// Builds a client from static keys when configured, otherwise from the named profile.
    pub async fn connect(storage: &StorageConfig, profile: Option<&str>, bucket: &str) -> Result<Self> {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(region) = &storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        match (&storage.credentials, profile) {
            (Some(keys), _) => {
                debug!("Using static S3 credentials");
                loader = loader.credentials_provider(s3::config::Credentials::new(
                    &keys.access_key_id,
                    &keys.secret_access_key,
                    None,
                    None,
                    "Static",
                ));
            }
            (None, Some(profile)) => {
                debug!("Using AWS profile '{}'", profile);
                loader = loader.profile_name(profile);
            }
            (None, None) => debug!("Using the default AWS credential chain"),
        }
        let sdk_config = loader.load().await;

        // Custom endpoints are S3-compatible stores, which expect path-style addressing.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.endpoint_url.is_some())
            .build();

        Ok(Self {
            client: s3::Client::from_conf(s3_config),
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Top-level prefixes of the bucket, one per service.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut services = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .delimiter("/")
                .set_continuation_token(token.take())
                .send()
                .await
                .with_context(|| format!("Failed to list services in bucket '{}'", self.bucket))?;

            services.extend(
                page.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .filter_map(service_from_prefix),
            );

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        services.sort();
        services.dedup();
        Ok(services)
    }

    /// Backups under `<service>/`, newest first.
    pub async fn list_backups(&self, service: &str) -> Result<Vec<RemoteBackup>> {
        let prefix = format!("{}/", service.trim_end_matches('/'));
        let mut backups = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", self.bucket, prefix))?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if !is_backup_key(key) {
                    continue;
                }
                backups.push(RemoteBackup {
                    key: key.to_string(),
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        sort_newest_first(&mut backups);
        Ok(backups)
    }

    /// Streams the object into `destination_dir`, keeping its file name.
    pub async fn download(&self, backup: &RemoteBackup, destination_dir: &Path) -> Result<BackupArtifact> {
        let destination_path = destination_dir.join(backup.file_name());
        info!(
            "⬇️ Downloading s3://{}/{} ({})...",
            self.bucket,
            backup.key,
            human_size(backup.size_bytes)
        );

        tokio::fs::create_dir_all(destination_dir)
            .await
            .with_context(|| format!("Failed to create download directory {}", destination_dir.display()))?;

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&backup.key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.bucket, backup.key))?;

        let mut output_file = File::create(&destination_path)
            .await
            .with_context(|| format!("Failed to create destination file: {}", destination_path.display()))?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Download of s3://{}/{} was interrupted", self.bucket, backup.key))?
        {
            output_file
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to {}", destination_path.display()))?;
            total_bytes += chunk.len() as u64;
        }
        output_file.flush().await?;

        info!(
            "✅ Downloaded {} to {}",
            human_size(total_bytes),
            destination_path.display()
        );
        Ok(BackupArtifact {
            path: destination_path,
            size_bytes: total_bytes,
            last_modified: backup.last_modified,
            source_kind: SourceKind::Cloud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(key: &str, secs: Option<i64>) -> RemoteBackup {
        RemoteBackup {
            key: key.to_string(),
            size_bytes: 2048,
            last_modified: secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
        }
    }

    #[test]
    fn only_recognised_suffixes_are_backups() {
        for key in ["svc/a.sql", "svc/a.tar.gz", "svc/a.TGZ", "svc/a.dump", "svc/a.pg_dump", "svc/a.bak"] {
            assert!(is_backup_key(key), "{key}");
        }
        for key in ["svc/", "svc/readme.md", "svc/a.log", "svc/a.sql.md5"] {
            assert!(!is_backup_key(key), "{key}");
        }
    }

    #[test]
    fn newest_backups_come_first_and_undated_last() {
        let mut list = vec![
            backup("svc/old.sql", Some(1_600_000_000)),
            backup("svc/undated.sql", None),
            backup("svc/new.sql", Some(1_700_000_000)),
        ];
        sort_newest_first(&mut list);
        let keys: Vec<_> = list.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["svc/new.sql", "svc/old.sql", "svc/undated.sql"]);
    }

    #[test]
    fn service_names_drop_the_delimiter() {
        assert_eq!(service_from_prefix("orders-api/"), Some("orders-api".to_string()));
        assert_eq!(service_from_prefix("/"), None);
    }

    #[test]
    fn file_name_never_escapes_the_download_dir() {
        assert_eq!(backup("svc/2024/orders.tar.gz", None).file_name(), "orders.tar.gz");
        assert_eq!(backup("svc/..", None).file_name(), "backup");
        assert_eq!(backup("svc/", None).file_name(), "backup");
    }

    #[test]
    fn smithy_timestamps_convert_to_chrono() {
        let value = aws_smithy_types::DateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&value).expect("valid timestamp");
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn label_shows_size_and_date() {
        let label = backup("svc/orders.sql", Some(1_700_000_000)).label();
        assert!(label.starts_with("orders.sql"));
        assert!(label.contains("2023-11-14"));
        assert!(label.contains(&human_size(2048)));
    }
}
