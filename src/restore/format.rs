// dbrestore/src/restore/format.rs
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::warn;

use super::model::DumpFormat;

/// Header of pg_dump custom-format archives.
pub const PGDMP_MAGIC: [u8; 5] = *b"PGDMP";

const SNIFF_LEN: usize = 512;

const SQL_MARKERS: [&str; 6] = ["--", "CREATE", "INSERT", "SET ", "\\connect", "BEGIN;"];
const DIRECTORY_MARKERS: [&str; 2] = ["toc.dat", "restore.sql"];

/// Classifies a dump by extension, then by its first bytes. Never fails: anything
/// unrecognised, or unreadable, is treated as SQL.
pub fn detect(path: &Path) -> DumpFormat {
    if path.is_dir() {
        return if path.join("toc.dat").is_file() {
            DumpFormat::Directory
        } else {
            warn!("⚠️ {} is a directory without toc.dat, assuming SQL", path.display());
            DumpFormat::Sql
        };
    }

    if let Some(format) = detect_by_extension(path) {
        return format;
    }

    match read_prefix(path, SNIFF_LEN) {
        Ok(prefix) => detect_bytes(&prefix),
        Err(e) => {
            warn!("⚠️ Could not read {} to detect its format ({}), assuming SQL", path.display(), e);
            DumpFormat::Sql
        }
    }
}

fn detect_by_extension(path: &Path) -> Option<DumpFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "sql" => Some(DumpFormat::Sql),
        "dump" => Some(DumpFormat::Custom),
        _ => None,
    }
}

/// Content rules only: magic header, SQL markers, directory-format markers, SQL fallback.
pub fn detect_bytes(prefix: &[u8]) -> DumpFormat {
    if prefix.starts_with(&PGDMP_MAGIC) {
        return DumpFormat::Custom;
    }

    let text = String::from_utf8_lossy(prefix);
    if SQL_MARKERS.iter().any(|m| text.contains(m)) {
        return DumpFormat::Sql;
    }
    if DIRECTORY_MARKERS.iter().any(|m| text.contains(m)) {
        return DumpFormat::Directory;
    }
    DumpFormat::Sql
}

/// Reads up to `len` bytes from the start of a file.
pub fn read_prefix(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn has_pgdmp_magic(path: &Path) -> bool {
    read_prefix(path, PGDMP_MAGIC.len())
        .map(|p| p == PGDMP_MAGIC)
        .unwrap_or(false)
}
