pub mod command;
pub mod connection;
pub mod prompt;
pub mod workdir;
#[cfg(test)]
pub mod testing;

use std::path::PathBuf;
use which::which;

use crate::errors::{RestoreError, Result};

/// Finds an executable (psql, pg_restore, tar, gzip) in the system PATH.
pub fn find_executable(tool: &str) -> Result<PathBuf> {
    which(tool).map_err(|_| RestoreError::MissingTool {
        tool: tool.to_string(),
    })
}

/// Formats a byte count the way listings show it (e.g. `12.4 MB`).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
