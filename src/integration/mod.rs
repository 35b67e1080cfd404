// dbrestore/src/integration/mod.rs
pub mod dbeaver;

use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::DbeaverConfig;
use crate::utils::connection::PgConnection;
use crate::utils::prompt::Prompt;
use dbeaver::{ConnectionEntry, DataSources, Upsert};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered { id: String, path: PathBuf },
    Reused { id: String, path: PathBuf },
    Skipped(String),
}

/// Offers to add the restored database to DBeaver. Never fails the run: problems are
/// logged and reported as `Skipped`.
///
/// `requested` carries `--dbeaver` (`Some(true)`) or `--no-dbeaver` (`Some(false)`).
pub fn offer_dbeaver(
    prompt: &mut dyn Prompt,
    config: &DbeaverConfig,
    requested: Option<bool>,
    target: &PgConnection,
    database: &str,
) -> Registration {
    let wanted = match requested {
        Some(choice) => choice,
        None if !config.enabled => false,
        None => match prompt.confirm(&format!("Add '{}' to DBeaver?", database), true) {
            Ok(choice) => choice,
            Err(e) => {
                warn!("⚠️ DBeaver prompt failed: {}", e);
                false
            }
        },
    };
    if !wanted {
        return Registration::Skipped("not requested".to_string());
    }

    let Some(path) = locate(config) else {
        println!("ℹ️ DBeaver workspace not detected; skipping connection registration.");
        return Registration::Skipped("workspace not detected".to_string());
    };

    let entry = ConnectionEntry {
        name: format!("{} ({})", database, target.host),
        host: target.host.clone(),
        port: target.port,
        database: database.to_string(),
        user: target.user.clone(),
        jdbc_url: target.jdbc_url(database),
    };

    let result = DataSources::load(&path).and_then(|mut sources| {
        let upsert = sources.upsert_connection(&entry, &config.folder);
        if matches!(upsert, Upsert::Created(_)) {
            sources.save()?;
        }
        Ok(upsert)
    });

    match result {
        Ok(Upsert::Created(id)) => {
            info!("✅ Added DBeaver connection '{}' in folder '{}'", entry.name, config.folder);
            Registration::Registered { id, path }
        }
        Ok(Upsert::Reused(id)) => {
            info!("✓ DBeaver already has a connection for '{}' ({})", database, id);
            Registration::Reused { id, path }
        }
        Err(e) => {
            warn!("⚠️ Could not update DBeaver connections at {}: {:#}", path.display(), e);
            Registration::Skipped(e.to_string())
        }
    }
}

/// A configured path is used as given; the default one only when DBeaver's workspace exists.
fn locate(config: &DbeaverConfig) -> Option<PathBuf> {
    if let Some(path) = &config.data_sources_path {
        return Some(path.clone());
    }
    let path = dbeaver::default_data_sources_path()?;
    let workspace = path.parent()?.parent()?;
    workspace.is_dir().then_some(path)
}
