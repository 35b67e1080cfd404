// dbrestore/src/restore/logic.rs
use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::archive::ArchiveExtractor;
use super::db_restore::{RestoreExecutor, RestoreSummary};
use super::model::{BackupArtifact, CreatePolicy, DetectedDump, RestoreTarget, SourceKind};
use super::pg_client::PgClient;
use super::s3_download::{BackupStore, RemoteBackup};
use crate::config::{AppConfig, StorageConfig};
use crate::errors::RestoreError;
use crate::integration::{self, Registration};
use crate::utils::command::CommandRunner;
use crate::utils::human_size;
use crate::utils::prompt::Prompt;
use crate::utils::workdir::{WorkDir, spawn_interrupt_cleanup};

const MAX_IDENTIFIER_BYTES: usize = 63;
const MAX_NAME_ATTEMPTS: usize = 20;

/// Suffixes removed from a local file name to derive the database base name.
const STRIPPED_SUFFIXES: [&str; 10] = [
    ".tar.gz", ".tgz", ".tar", ".gz", ".sql", ".dump", ".dmp", ".pg_dump", ".backup", ".bak",
];

/// Answers supplied up front on the command line. Anything left `None` is asked for.
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub source: Option<SourceKind>,
    pub file: Option<PathBuf>,
    pub profile: Option<String>,
    pub environment: Option<String>,
    pub service: Option<String>,
    pub backup: Option<String>,
    pub database: Option<String>,
    pub policy: Option<CreatePolicy>,
    /// `Some(true)` for `--dbeaver`, `Some(false)` for `--no-dbeaver`.
    pub dbeaver: Option<bool>,
}

/// Cloud choices made once during source selection and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSelection {
    pub environment: Option<String>,
    pub profile: Option<String>,
    pub bucket: String,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub database: String,
    pub dump: DetectedDump,
    pub summary: RestoreSummary,
    pub registration: Registration,
}

/// Lowercases, maps everything outside `[a-z0-9_]` to `_`, prefixes a leading digit with
/// `db_` and truncates to PostgreSQL's identifier limit.
pub fn sanitize_database_name(raw: &str) -> crate::errors::Result<String> {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' { c } else { '_' }
        })
        .collect();
    if name.chars().all(|c| c == '_') {
        return Err(RestoreError::InvalidInput(format!(
            "'{}' does not contain any usable database name characters",
            raw
        )));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "db_");
    }
    name.truncate(MAX_IDENTIFIER_BYTES);
    Ok(name)
}

// Names are ASCII after sanitizing, so byte truncation is safe.
fn with_suffix(base: &str, suffix: &str) -> String {
    let keep = MAX_IDENTIFIER_BYTES.saturating_sub(suffix.len() + 1).min(base.len());
    format!("{}_{}", &base[..keep], suffix)
}

/// `orders_2024-01-01.sql.gz` -> `orders_2024-01-01`.
pub fn base_name_from_file(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    loop {
        let lower = name.to_ascii_lowercase();
        match STRIPPED_SUFFIXES.iter().find(|s| lower.ends_with(*s) && lower.len() > s.len()) {
            Some(suffix) => name.truncate(name.len() - suffix.len()),
            None => break,
        }
    }
    if name.is_empty() { "restored".to_string() } else { name }
}

/// `<base>_<YYYYMMDD>`, then `<base>_<YYYYMMDD>_<HHMMSS>`, then numbered variants of the
/// latter, whichever is free first.
pub fn dated_name(client: &PgClient<'_>, base: &str, now: NaiveDateTime) -> crate::errors::Result<String> {
    let base = sanitize_database_name(base)?;
    let name = with_suffix(&base, &now.format("%Y%m%d").to_string());
    if !client.database_exists(&name)? {
        return Ok(name);
    }
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 1 {
            with_suffix(&base, &stamp)
        } else {
            with_suffix(&base, &format!("{}_{}", stamp, attempt))
        };
        if !client.database_exists(&candidate)? {
            info!("Database '{}' already exists, using '{}' instead", name, candidate);
            return Ok(candidate);
        }
        debug!("Database '{}' is taken as well", candidate);
    }
    Err(RestoreError::InvalidInput(format!(
        "Could not find a free database name for '{}' after {} attempts",
        base,
        MAX_NAME_ATTEMPTS + 1
    )))
}

/// Picks the target database and applies the lifecycle policy: drops happen here, only after
/// confirmation; creation is left to the executor.
pub fn resolve_target(
    client: &PgClient<'_>,
    prompt: &mut dyn Prompt,
    request: &RestoreRequest,
    base: &str,
    now: NaiveDateTime,
) -> crate::errors::Result<RestoreTarget> {
    let policy = match request.policy {
        Some(policy) => policy,
        None => {
            let items: Vec<String> = CreatePolicy::ALL.iter().map(|p| p.describe().to_string()).collect();
            CreatePolicy::ALL[prompt.select("How should the backup be restored?", &items)?]
        }
    };
    debug!("Create policy: {:?}", policy);

    match policy {
        CreatePolicy::CreateNewDated => {
            let name = match &request.database {
                Some(name) => dated_name(client, name, now)?,
                None => dated_name(client, base, now)?,
            };
            Ok(RestoreTarget::new(name, policy, false))
        }
        CreatePolicy::CreateNewNamed => {
            let raw = match &request.database {
                Some(name) => name.clone(),
                None => {
                    let default = sanitize_database_name(base)?;
                    prompt.input("New database name", Some(&default))?
                }
            };
            let name = sanitize_database_name(&raw)?;
            if client.database_exists(&name)? {
                confirm_drop(prompt, &name)?;
                client.drop_database(&name)?;
            }
            Ok(RestoreTarget::new(name, policy, false))
        }
        CreatePolicy::RestoreExisting => {
            let name = pick_existing(client, prompt, request, "Restore into which database?")?;
            let exists = client.database_exists(&name)?;
            if exists {
                info!("♻️ Restoring into existing database '{}' in place", name);
            } else {
                info!("Database '{}' does not exist yet, it will be created", name);
            }
            Ok(RestoreTarget::new(name, policy, exists))
        }
        CreatePolicy::ReplaceExisting => {
            let name = pick_existing(client, prompt, request, "Which database should be replaced?")?;
            if client.is_protected(&name) {
                return Err(RestoreError::InvalidInput(format!(
                    "'{}' is a system or maintenance database and cannot be replaced",
                    name
                )));
            }
            if client.database_exists(&name)? {
                confirm_drop(prompt, &name)?;
                client.drop_database(&name)?;
            }
            Ok(RestoreTarget::new(name, policy, false))
        }
    }
}

fn confirm_drop(prompt: &mut dyn Prompt, name: &str) -> crate::errors::Result<()> {
    let message = format!(
        "⚠️ Database '{}' already exists. DROP it and all its data, then recreate it?",
        name
    );
    if prompt.confirm(&message, false)? {
        Ok(())
    } else {
        Err(RestoreError::Cancelled(format!("database '{}' was left untouched", name)))
    }
}

fn pick_existing(
    client: &PgClient<'_>,
    prompt: &mut dyn Prompt,
    request: &RestoreRequest,
    title: &str,
) -> crate::errors::Result<String> {
    if let Some(name) = request.database.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }
    let names = client.list_databases()?;
    if names.is_empty() {
        return prompt.input("Database name", None);
    }
    let index = prompt.select(title, &names)?;
    Ok(names[index].clone())
}

fn choose_source(prompt: &mut dyn Prompt, request: &RestoreRequest, config: &AppConfig) -> Result<SourceKind> {
    if let Some(source) = request.source {
        return Ok(source);
    }
    if request.file.is_some() {
        return Ok(SourceKind::Local);
    }
    if config.storage.is_none() {
        info!("No s3_storage configured, restoring from a local file");
        return Ok(SourceKind::Local);
    }
    let items = vec![
        "Cloud storage (S3)".to_string(),
        "Local file or directory".to_string(),
    ];
    Ok(match prompt.select("Where is the backup?", &items)? {
        0 => SourceKind::Cloud,
        _ => SourceKind::Local,
    })
}

/// Environment, profile and bucket for a cloud restore.
pub fn select_storage(
    prompt: &mut dyn Prompt,
    storage: &StorageConfig,
    request: &RestoreRequest,
) -> Result<SourceSelection> {
    let (environment, bucket) = match &request.environment {
        Some(env) => match storage.environments.get(env) {
            Some(bucket) => (Some(env.clone()), bucket.clone()),
            None => bail!(
                "Unknown environment '{}'. Configured environments: [{}]",
                env,
                storage.environments.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        },
        None if storage.environments.is_empty() => (None, prompt.input("Bucket name", None)?),
        None => {
            let names: Vec<String> = storage.environments.keys().cloned().collect();
            let index = if names.len() == 1 { 0 } else { prompt.select("Select environment", &names)? };
            let name = names[index].clone();
            let bucket = storage.environments[&name].clone();
            (Some(name), bucket)
        }
    };

    let profile = if storage.credentials.is_some() {
        None
    } else if let Some(profile) = &request.profile {
        Some(profile.clone())
    } else {
        match storage.profiles.len() {
            0 => None,
            1 => Some(storage.profiles[0].clone()),
            _ => Some(storage.profiles[prompt.select("Select AWS profile", &storage.profiles)?].clone()),
        }
    };

    Ok(SourceSelection {
        environment,
        profile,
        bucket,
    })
}

async fn fetch_cloud_backup(
    config: &AppConfig,
    request: &RestoreRequest,
    prompt: &mut dyn Prompt,
    work_dir: &WorkDir,
) -> Result<(BackupArtifact, String)> {
    let storage = config
        .storage
        .as_ref()
        .context("Cloud source selected but s3_storage is not configured")?;
    let selection = select_storage(prompt, storage, request)?;
    info!(
        "☁️ Using bucket '{}'{}{}",
        selection.bucket,
        selection.environment.as_deref().map(|e| format!(" (environment {})", e)).unwrap_or_default(),
        selection.profile.as_deref().map(|p| format!(" with profile {}", p)).unwrap_or_default()
    );

    let store = BackupStore::connect(storage, selection.profile.as_deref(), &selection.bucket).await?;

    let service = match &request.service {
        Some(service) => service.clone(),
        None => {
            let services = store.list_services().await?;
            if services.is_empty() {
                bail!("No services found in bucket '{}'", store.bucket());
            }
            services[prompt.select("Select service", &services)?].clone()
        }
    };

    let backups = store.list_backups(&service).await?;
    if backups.is_empty() {
        bail!("No backups found under s3://{}/{}/", store.bucket(), service);
    }
    let backup = choose_backup(prompt, &backups, request.backup.as_deref())?;

    let artifact = store.download(backup, &work_dir.subdir("download")?).await?;
    Ok((artifact, service))
}

fn choose_backup<'b>(
    prompt: &mut dyn Prompt,
    backups: &'b [RemoteBackup],
    wanted: Option<&str>,
) -> Result<&'b RemoteBackup> {
    if let Some(wanted) = wanted {
        return backups
            .iter()
            .find(|b| b.key == wanted || b.file_name() == wanted)
            .with_context(|| format!("Backup '{}' not found", wanted));
    }
    let labels: Vec<String> = backups.iter().map(RemoteBackup::label).collect();
    Ok(&backups[prompt.select("Select backup (newest first)", &labels)?])
}

/// Strips quotes left by drag-and-drop and expands a leading `~/`.
pub fn clean_local_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim().trim_matches(|c: char| c == '"' || c == '\'');
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(trimmed)
}

fn local_artifact(prompt: &mut dyn Prompt, request: &RestoreRequest) -> Result<(BackupArtifact, String)> {
    let path = match &request.file {
        Some(path) => path.clone(),
        None => clean_local_path(&prompt.input("Path to the backup file or dump directory", None)?),
    };
    if !path.exists() {
        return Err(RestoreError::InvalidInput(format!("Backup path {} does not exist", path.display())).into());
    }
    let artifact = BackupArtifact::from_local(&path, SourceKind::Local)?;
    if path.is_file() && artifact.size_bytes == 0 {
        return Err(RestoreError::EmptyDump(path).into());
    }
    let base = base_name_from_file(&path);
    Ok((artifact, base))
}

/// Runs one restore end to end. The work directory is removed on every exit path.
pub async fn perform_restore_orchestration(
    config: &AppConfig,
    request: &RestoreRequest,
    prompt: &mut dyn Prompt,
    runner: &dyn CommandRunner,
) -> Result<RestoreReport> {
    let client = PgClient::new(runner, &config.target);
    client
        .check_connection(&config.target.admin_database)
        .context("Cannot reach the target PostgreSQL server")?;
    info!("✓ Connected to {}:{}", config.target.host, config.target.port);

    let work_dir = WorkDir::create(config.temp_root.as_deref())?;
    let watcher = spawn_interrupt_cleanup(work_dir.handle());

    let result = restore_in(config, request, prompt, &client, &work_dir).await;

    watcher.abort();
    if work_dir.cleanup() {
        debug!("Removed work directory {}", work_dir.path().display());
    }
    result
}

async fn restore_in(
    config: &AppConfig,
    request: &RestoreRequest,
    prompt: &mut dyn Prompt,
    client: &PgClient<'_>,
    work_dir: &WorkDir,
) -> Result<RestoreReport> {
    let (artifact, base) = match choose_source(prompt, request, config)? {
        SourceKind::Cloud => fetch_cloud_backup(config, request, prompt, work_dir).await?,
        SourceKind::Local => local_artifact(prompt, request)?,
    };
    info!(
        "📦 Backup {} ({}{})",
        artifact.path.display(),
        human_size(artifact.size_bytes),
        artifact
            .last_modified
            .map(|t| format!(", modified {}", t.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default()
    );

    let dump = ArchiveExtractor::new(config.archive_backend, client.runner())
        .extract(&artifact.path, work_dir.path())
        .context("Could not prepare the backup for restore")?;
    info!(
        "✓ Selected dump {} ({} format, {})",
        dump.path.display(),
        dump.format,
        human_size(dump.size_bytes)
    );

    let mut target = resolve_target(client, prompt, request, &base, Local::now().naive_local())?;

    let mut executor = RestoreExecutor::new(client, config.restore_owner.clone());
    let outcome = executor.run(&dump, &mut target);
    debug!("Restore executor finished in state {:?}", executor.state());
    let summary = outcome.with_context(|| format!("Restore into '{}' failed", target.database_name()))?;

    let registration = integration::offer_dbeaver(
        prompt,
        &config.dbeaver,
        request.dbeaver,
        &config.target,
        target.database_name(),
    );

    Ok(RestoreReport {
        database: target.database_name().to_string(),
        dump,
        summary,
        registration,
    })
}

pub fn print_summary(report: &RestoreReport) {
    let verification = &report.summary.report;
    println!("\n🎉 Restore complete");
    println!("   Database:  {}", report.database);
    println!("   Dump:      {} ({})", report.dump.path.display(), report.dump.format);
    println!("   Strategy:  {}", report.summary.strategy);
    println!(
        "   Objects:   {} tables, {} sequences, {} views",
        verification.table_count, verification.sequence_count, verification.view_count
    );
    println!("   Size:      {}", verification.database_size_pretty);
    if !verification.top_tables.is_empty() {
        println!("   Largest tables (row counts are estimates):");
        for (name, rows) in &verification.top_tables {
            match rows {
                Some(rows) => println!("     {:<48} ~{} rows", name, rows),
                None => println!("     {}", name),
            }
        }
    }
    if report.summary.with_warnings {
        println!("   ⚠️ The restore tool reported errors that were tolerated; see the log above.");
    }
    match &report.registration {
        Registration::Registered { id, path } => println!("   DBeaver:   added {} to {}", id, path.display()),
        Registration::Reused { id, .. } => println!("   DBeaver:   existing connection {}", id),
        Registration::Skipped(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbeaverConfig, StaticCredentials};
    use crate::restore::archive::ArchiveBackend;
    use crate::utils::command::CommandSpec;
    use crate::utils::connection::PgConnection;
    use crate::utils::testing::{FakeRunner, ScriptedPrompt, ok, sql_contains};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn conn() -> PgConnection {
        PgConnection::from_url("postgres://restore:pw@localhost/postgres").expect("valid url")
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .expect("valid timestamp")
    }

    fn is_drop(s: &CommandSpec) -> bool {
        s.args.iter().any(|a| a.starts_with("DROP DATABASE"))
    }

    fn request(policy: CreatePolicy, database: Option<&str>) -> RestoreRequest {
        RestoreRequest {
            policy: Some(policy),
            database: database.map(str::to_string),
            ..RestoreRequest::default()
        }
    }

    #[test]
    fn names_are_sanitized() -> anyhow::Result<()> {
        assert_eq!(sanitize_database_name("Orders-API prod")?, "orders_api_prod");
        assert_eq!(sanitize_database_name("2024_backup")?, "db_2024_backup");
        assert_eq!(sanitize_database_name(&"x".repeat(80))?.len(), 63);
        assert!(sanitize_database_name("---").is_err());
        assert!(sanitize_database_name("").is_err());
        Ok(())
    }

    #[test]
    fn base_names_drop_backup_suffixes() {
        assert_eq!(base_name_from_file(Path::new("/b/orders_prod.sql.gz")), "orders_prod");
        assert_eq!(base_name_from_file(Path::new("/b/Orders.TAR.GZ")), "Orders");
        assert_eq!(base_name_from_file(Path::new("/b/export")), "export");
        assert_eq!(base_name_from_file(Path::new("/b/.sql")), ".sql");
    }

    #[test]
    fn dated_name_appends_time_on_collision() -> anyhow::Result<()> {
        let conn = conn();
        let free = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("f"));
        assert_eq!(dated_name(&PgClient::new(&free, &conn), "Orders API", noon())?, "orders_api_20240101");

        let taken = FakeRunner::new()
            .once(sql_contains("FROM pg_database"), ok("t"))
            .on(sql_contains("FROM pg_database"), ok("f"));
        assert_eq!(
            dated_name(&PgClient::new(&taken, &conn), "orders", noon())?,
            "orders_20240101_093000"
        );

        let everything_taken = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("t"));
        assert!(dated_name(&PgClient::new(&everything_taken, &conn), "orders", noon()).is_err());

        let long = dated_name(&PgClient::new(&free, &conn), &"a".repeat(70), noon())?;
        assert_eq!(long.len(), 63);
        assert!(long.ends_with("_20240101"));
        Ok(())
    }

    #[test]
    fn dated_name_keeps_looking_while_candidates_are_taken() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new()
            .once(sql_contains("FROM pg_database"), ok("t"))
            .once(sql_contains("FROM pg_database"), ok("t"))
            .on(sql_contains("FROM pg_database"), ok("f"));
        let client = PgClient::new(&runner, &conn);

        assert_eq!(dated_name(&client, "orders", noon())?, "orders_20240101_093000_2");
        assert_eq!(runner.count(sql_contains("FROM pg_database")), 3);
        assert_eq!(runner.count(sql_contains("'orders_20240101_093000'")), 1);
        Ok(())
    }

    #[test]
    fn restore_existing_reuses_database_without_dropping() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("t"));
        let client = PgClient::new(&runner, &conn);
        let mut prompt = ScriptedPrompt::new();

        let target = resolve_target(
            &client,
            &mut prompt,
            &request(CreatePolicy::RestoreExisting, Some("orders")),
            "ignored",
            noon(),
        )?;
        assert_eq!(target.database_name(), "orders");
        assert!(target.exists);
        assert_eq!(runner.count(is_drop), 0);
        assert!(prompt.asked.is_empty());
        Ok(())
    }

    #[test]
    fn existing_database_is_chosen_from_the_server_list() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new()
            .on(sql_contains("NOT datistemplate"), ok("orders\nreports\n"))
            .on(sql_contains("FROM pg_database WHERE datname"), ok("t"));
        let client = PgClient::new(&runner, &conn);
        let mut prompt = ScriptedPrompt::new().select(2).select(1);

        let target = resolve_target(&client, &mut prompt, &RestoreRequest::default(), "x", noon())?;
        assert_eq!(target.create_policy, CreatePolicy::RestoreExisting);
        assert_eq!(target.database_name(), "reports");
        Ok(())
    }

    #[test]
    fn replacing_requires_confirmation() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("t"));
        let client = PgClient::new(&runner, &conn);

        let mut declined = ScriptedPrompt::new().confirm(false);
        let err = resolve_target(
            &client,
            &mut declined,
            &request(CreatePolicy::ReplaceExisting, Some("orders")),
            "x",
            noon(),
        )
        .unwrap_err();
        assert!(matches!(err, RestoreError::Cancelled(_)));
        assert_eq!(runner.count(is_drop), 0);

        let mut accepted = ScriptedPrompt::new().confirm(true);
        let target = resolve_target(
            &client,
            &mut accepted,
            &request(CreatePolicy::ReplaceExisting, Some("orders")),
            "x",
            noon(),
        )?;
        assert!(!target.exists);
        assert_eq!(runner.count(is_drop), 1);
        Ok(())
    }

    #[test]
    fn named_database_collision_asks_before_dropping() -> anyhow::Result<()> {
        let conn = conn();
        let runner = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("t"));
        let client = PgClient::new(&runner, &conn);
        let mut prompt = ScriptedPrompt::new().input("Orders Copy").confirm(true);

        let target = resolve_target(&client, &mut prompt, &request(CreatePolicy::CreateNewNamed, None), "orders", noon())?;
        assert_eq!(target.database_name(), "orders_copy");
        assert_eq!(runner.count(is_drop), 1);
        Ok(())
    }

    #[test]
    fn replace_refuses_the_admin_database() {
        let conn = conn();
        let runner = FakeRunner::new().on(sql_contains("FROM pg_database"), ok("t"));
        let client = PgClient::new(&runner, &conn);
        let mut prompt = ScriptedPrompt::new().confirm(true);

        let err = resolve_target(
            &client,
            &mut prompt,
            &request(CreatePolicy::ReplaceExisting, Some("postgres")),
            "x",
            noon(),
        )
        .unwrap_err();
        assert!(matches!(err, RestoreError::InvalidInput(_)));
        assert_eq!(runner.count(is_drop), 0);
        assert!(prompt.asked.is_empty());
        assert!(runner.calls().is_empty());
    }

    fn storage(environments: &[(&str, &str)], profiles: &[&str], keys: bool) -> StorageConfig {
        StorageConfig {
            region: Some("us-east-1".to_string()),
            endpoint_url: None,
            credentials: keys.then(|| StaticCredentials {
                access_key_id: "AKIA".to_string(),
                secret_access_key: "shh".to_string(),
            }),
            profiles: profiles.iter().map(|p| p.to_string()).collect(),
            environments: environments
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn storage_selection_uses_environment_map_and_profiles() -> anyhow::Result<()> {
        let single = storage(&[("staging", "bk-staging")], &["ops"], false);
        let mut prompt = ScriptedPrompt::new();
        let selection = select_storage(&mut prompt, &single, &RestoreRequest::default())?;
        assert_eq!(
            selection,
            SourceSelection {
                environment: Some("staging".to_string()),
                profile: Some("ops".to_string()),
                bucket: "bk-staging".to_string(),
            }
        );
        assert!(prompt.asked.is_empty());

        let many = storage(&[("production", "bk-prod"), ("staging", "bk-staging")], &["dev", "prod"], false);
        let mut prompt = ScriptedPrompt::new().select(0).select(1);
        let selection = select_storage(&mut prompt, &many, &RestoreRequest::default())?;
        assert_eq!(selection.bucket, "bk-prod");
        assert_eq!(selection.profile.as_deref(), Some("prod"));

        let keyed = storage(&[("production", "bk-prod")], &["dev", "prod"], true);
        let selection = select_storage(&mut ScriptedPrompt::new(), &keyed, &RestoreRequest::default())?;
        assert_eq!(selection.profile, None);

        let unknown = RestoreRequest {
            environment: Some("qa".to_string()),
            ..RestoreRequest::default()
        };
        assert!(select_storage(&mut ScriptedPrompt::new(), &many, &unknown).is_err());
        Ok(())
    }

    #[test]
    fn backups_can_be_named_by_key_or_file_name() -> anyhow::Result<()> {
        let backups = vec![
            RemoteBackup { key: "svc/new.sql".to_string(), size_bytes: 1, last_modified: None },
            RemoteBackup { key: "svc/old.sql".to_string(), size_bytes: 1, last_modified: None },
        ];
        let mut prompt = ScriptedPrompt::new();
        assert_eq!(choose_backup(&mut prompt, &backups, Some("old.sql"))?.key, "svc/old.sql");
        assert_eq!(choose_backup(&mut prompt, &backups, Some("svc/new.sql"))?.key, "svc/new.sql");
        assert!(choose_backup(&mut prompt, &backups, Some("missing.sql")).is_err());

        let mut prompt = ScriptedPrompt::new().select(1);
        assert_eq!(choose_backup(&mut prompt, &backups, None)?.key, "svc/old.sql");
        Ok(())
    }

    #[test]
    fn local_paths_are_cleaned_and_validated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("orders.sql");
        std::fs::write(&path, "CREATE TABLE t (id int);")?;

        let quoted = format!("  '{}'  ", path.display());
        assert_eq!(clean_local_path(&quoted), path);

        let mut prompt = ScriptedPrompt::new().input(&quoted);
        let (artifact, base) = local_artifact(&mut prompt, &RestoreRequest::default())?;
        assert_eq!(artifact.source_kind, SourceKind::Local);
        assert_eq!(base, "orders");

        let missing = RestoreRequest {
            file: Some(dir.path().join("nope.sql")),
            ..RestoreRequest::default()
        };
        assert!(local_artifact(&mut ScriptedPrompt::new(), &missing).is_err());

        let empty = dir.path().join("empty.sql");
        std::fs::write(&empty, "")?;
        let empty_request = RestoreRequest {
            file: Some(empty),
            ..RestoreRequest::default()
        };
        assert!(local_artifact(&mut ScriptedPrompt::new(), &empty_request).is_err());
        Ok(())
    }

    fn app_config(temp_root: &Path) -> AppConfig {
        AppConfig {
            target: conn(),
            restore_owner: "app".to_string(),
            temp_root: Some(temp_root.to_path_buf()),
            archive_backend: ArchiveBackend::Native,
            storage: None,
            dbeaver: DbeaverConfig {
                enabled: false,
                data_sources_path: None,
                folder: "Restored".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn local_sql_file_restores_into_existing_database() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let temp_root = scratch.path().join("work");
        std::fs::create_dir_all(&temp_root)?;
        let dump = scratch.path().join("orders.sql");
        std::fs::write(&dump, "CREATE TABLE t (id int);\nINSERT INTO t VALUES (1);\n")?;

        let runner = FakeRunner::new()
            .on(sql_contains("FROM pg_database"), ok("t"))
            .on(sql_contains("SELECT 1"), ok("1"))
            .on(sql_contains("count(*) FROM information_schema.tables"), ok("1"));
        let config = app_config(&temp_root);
        let request = RestoreRequest {
            file: Some(dump.clone()),
            policy: Some(CreatePolicy::RestoreExisting),
            database: Some("orders".to_string()),
            ..RestoreRequest::default()
        };
        let mut prompt = ScriptedPrompt::new();

        let report = perform_restore_orchestration(&config, &request, &mut prompt, &runner).await?;
        assert_eq!(report.database, "orders");
        assert_eq!(report.dump.path, dump);
        assert_eq!(report.summary.report.table_count, 1);
        assert!(matches!(report.registration, Registration::Skipped(_)));
        assert_eq!(runner.count(is_drop), 0);
        assert!(std::fs::read_dir(&temp_root)?.next().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_archive_fails_and_leaves_no_work_dir() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let temp_root = scratch.path().join("work");
        std::fs::create_dir_all(&temp_root)?;
        let archive = scratch.path().join("orders.tar.gz");
        let mut bytes = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];
        bytes.extend([0xff; 64]);
        std::fs::write(&archive, bytes)?;

        let runner = FakeRunner::new().on(sql_contains("SELECT 1"), ok("1"));
        let request = RestoreRequest {
            file: Some(archive),
            policy: Some(CreatePolicy::RestoreExisting),
            database: Some("orders".to_string()),
            ..RestoreRequest::default()
        };

        let err = perform_restore_orchestration(&app_config(&temp_root), &request, &mut ScriptedPrompt::new(), &runner)
            .await
            .unwrap_err();
        let root_cause = err.downcast_ref::<RestoreError>();
        assert!(matches!(root_cause, Some(RestoreError::ExtractionFailed { .. })), "{:?}", err);
        assert!(std::fs::read_dir(&temp_root)?.next().is_none());
        assert_eq!(runner.count(|s| s.program == "psql" && s.has_arg("-f")), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_server_stops_before_any_work() {
        let runner = FakeRunner::new().on(
            sql_contains("SELECT 1"),
            crate::utils::testing::exit(2, "psql: error: connection refused"),
        );
        let scratch = tempfile::tempdir().expect("tempdir");
        let request = RestoreRequest {
            source: Some(SourceKind::Local),
            ..RestoreRequest::default()
        };
        let result =
            perform_restore_orchestration(&app_config(scratch.path()), &request, &mut ScriptedPrompt::new(), &runner)
                .await;
        assert!(result.is_err());
        assert_eq!(runner.calls().len(), 1);
    }
}
