// dbrestore/src/restore/archive.rs
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::GzDecoder;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::format::{self, has_pgdmp_magic, read_prefix};
use super::model::{DetectedDump, DumpFormat};
use crate::errors::{RestoreError, Result};
use crate::utils::command::{CommandRunner, CommandSpec};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC: &[u8; 5] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Known dump extensions, most preferred first.
pub const EXTENSION_PRIORITIES: [(&str, u32); 6] = [
    ("sql", 1),
    ("dump", 2),
    ("dmp", 3),
    ("pg_dump", 4),
    ("backup", 5),
    ("bak", 6),
];
pub const DIRECTORY_DUMP_PRIORITY: u32 = 0;
pub const MAGIC_HEADER_PRIORITY: u32 = 7;
pub const NAME_HINT_PRIORITY: u32 = 10;

/// Extension-less files smaller than this are not considered binary dumps.
const MIN_MAGIC_CANDIDATE_SIZE: u64 = 1024;
const NAME_HINT_PATTERN: &str = r"(?i)(database|backup|dump|\.db$|\.bak$|postgres|pg_)";

/// How archives are unpacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    /// In-process gzip/tar.
    #[default]
    Native,
    /// `tar` and `gzip` from PATH.
    System,
}

impl FromStr for ArchiveBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(ArchiveBackend::Native),
            "system" => Ok(ArchiveBackend::System),
            other => Err(format!("unknown archive backend '{}', expected 'native' or 'system'", other)),
        }
    }
}

/// What to do with an input, decided from its file name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Tar,
    Gzip,
    Direct,
    Sniff,
}

fn archive_kind(path: &Path) -> ArchiveKind {
    let name = file_name_lower(path);
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ArchiveKind::TarGz
    } else if name.ends_with(".tar") {
        ArchiveKind::Tar
    } else if name.ends_with(".gz") {
        ArchiveKind::Gzip
    } else if name.ends_with(".sql") || name.ends_with(".dump") {
        ArchiveKind::Direct
    } else {
        ArchiveKind::Sniff
    }
}

pub struct ArchiveExtractor<'a> {
    backend: ArchiveBackend,
    runner: &'a dyn CommandRunner,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(backend: ArchiveBackend, runner: &'a dyn CommandRunner) -> Self {
        Self { backend, runner }
    }

    /// Unpacks `artifact` under `work_dir` when needed and returns the dump to restore.
    pub fn extract(&self, artifact: &Path, work_dir: &Path) -> Result<DetectedDump> {
        if artifact.is_dir() {
            info!("📂 {} is a directory, searching it for a dump", artifact.display());
            return discover_dump(artifact);
        }

        let extract_dir = work_dir.join("extract");
        std::fs::create_dir_all(&extract_dir)?;

        let kind = archive_kind(artifact);
        debug!("Archive kind for {}: {:?}", artifact.display(), kind);
        match kind {
            ArchiveKind::TarGz => {
                self.untar(artifact, &extract_dir, true)?;
                discover_dump(&extract_dir)
            }
            ArchiveKind::Tar => {
                self.untar(artifact, &extract_dir, false)?;
                discover_dump(&extract_dir)
            }
            ArchiveKind::Gzip => self.extract_gzip(artifact, &extract_dir),
            ArchiveKind::Direct => Ok(raw_dump(artifact)),
            ArchiveKind::Sniff => {
                let prefix = read_prefix(artifact, GZIP_MAGIC.len())?;
                if prefix == GZIP_MAGIC {
                    info!("🔍 {} carries a gzip header, decompressing", artifact.display());
                    self.extract_gzip(artifact, &extract_dir)
                } else {
                    Ok(raw_dump(artifact))
                }
            }
        }
    }

    fn extract_gzip(&self, artifact: &Path, extract_dir: &Path) -> Result<DetectedDump> {
        let member = self.gunzip(artifact, extract_dir)?;

        if is_tar(&member) {
            info!("📦 Decompressed member {} is a tar archive, unpacking", member.display());
            let untar_dir = extract_dir.join("untar");
            std::fs::create_dir_all(&untar_dir)?;
            self.untar(&member, &untar_dir, false)?;
            std::fs::remove_file(&member)?;
            return discover_dump(extract_dir);
        }

        match discover_dump(extract_dir) {
            Ok(dump) if dump.format != DumpFormat::Unknown => Ok(dump),
            _ => Ok(raw_dump(&member)),
        }
    }

    fn untar(&self, archive: &Path, dest: &Path, gzipped: bool) -> Result<()> {
        info!(
            "Extracting {} archive from {} to {}",
            if gzipped { "tar.gz" } else { "tar" },
            archive.display(),
            dest.display()
        );
        let result = match self.backend {
            ArchiveBackend::Native => native_untar(archive, dest, gzipped),
            ArchiveBackend::System => {
                let flags = if gzipped { "-xzf" } else { "-xf" };
                let spec = CommandSpec::new("tar")
                    .arg(flags)
                    .arg(archive.display().to_string())
                    .arg("-C")
                    .arg(dest.display().to_string());
                self.run_tool(&spec)
            }
        };
        let result = result.and_then(|()| match std::fs::read_dir(dest) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    Ok(())
                } else {
                    Err("archive contained no files".to_string())
                }
            }
            Err(e) => Err(format!("could not read extraction directory: {}", e)),
        });
        result.map_err(|reason| RestoreError::ExtractionFailed {
            path: archive.to_path_buf(),
            reason,
        })?;
        info!("✓ Archive extracted to {}", dest.display());
        Ok(())
    }

    /// Decompresses a single gzip stream into `dest`, returning the output file.
    fn gunzip(&self, archive: &Path, dest: &Path) -> Result<PathBuf> {
        let out_name = gunzipped_name(archive);
        let out_path = dest.join(&out_name);
        info!("Decompressing {} to {}", archive.display(), out_path.display());

        let result = match self.backend {
            ArchiveBackend::Native => native_gunzip(archive, &out_path),
            ArchiveBackend::System => {
                // gzip works in place and insists on the .gz suffix.
                let staged = dest.join(format!("{}.gz", out_name));
                std::fs::copy(archive, &staged)
                    .map_err(|e| format!("could not stage archive: {}", e))
                    .and_then(|_| {
                        let spec = CommandSpec::new("gzip")
                            .args(["-d", "-f"])
                            .arg(staged.display().to_string());
                        self.run_tool(&spec)
                    })
            }
        };
        result.map_err(|reason| RestoreError::ExtractionFailed {
            path: archive.to_path_buf(),
            reason,
        })?;
        Ok(out_path)
    }

    fn run_tool(&self, spec: &CommandSpec) -> std::result::Result<(), String> {
        match self.runner.run(spec) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!(
                "{} exited with status {}: {}",
                spec.program,
                out.exit_code,
                out.stderr.trim()
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn native_untar(archive: &Path, dest: &Path, gzipped: bool) -> std::result::Result<(), String> {
    let file = File::open(archive).map_err(|e| format!("could not open archive: {}", e))?;
    let unpacked = if gzipped {
        tar::Archive::new(GzDecoder::new(file)).unpack(dest)
    } else {
        tar::Archive::new(file).unpack(dest)
    };
    unpacked.map_err(|e| format!("could not unpack archive: {}", e))
}

fn native_gunzip(archive: &Path, out_path: &Path) -> std::result::Result<(), String> {
    let file = File::open(archive).map_err(|e| format!("could not open archive: {}", e))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = File::create(out_path).map_err(|e| format!("could not create output file: {}", e))?;
    io::copy(&mut decoder, &mut out).map_err(|e| format!("could not decompress: {}", e))?;
    Ok(())
}

fn gunzipped_name(archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    let lower = name.to_ascii_lowercase();
    match lower.strip_suffix(".gz") {
        Some(stripped) if !stripped.is_empty() => name[..stripped.len()].to_string(),
        _ => name,
    }
}

fn is_tar(path: &Path) -> bool {
    read_prefix(path, TAR_MAGIC_OFFSET + TAR_MAGIC.len())
        .map(|p| p.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len() && &p[TAR_MAGIC_OFFSET..] == TAR_MAGIC)
        .unwrap_or(false)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn extension_priority(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSION_PRIORITIES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, priority)| *priority)
}

/// A file that is used as-is, without extraction.
fn raw_dump(path: &Path) -> DetectedDump {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    DetectedDump {
        path: path.to_path_buf(),
        format: format::detect(path),
        priority: extension_priority(path).unwrap_or(NAME_HINT_PRIORITY),
        size_bytes,
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative: String,
    size: u64,
    depth: usize,
}

/// Discovery stages, tried top-down; the first one that yields a dump wins.
#[derive(Debug, Clone, Copy)]
enum DiscoveryStage {
    /// A directory holding `toc.dat`: pg_dump directory format.
    DirectoryFormat,
    /// Files with a known dump extension, ranked by `EXTENSION_PRIORITIES`.
    KnownExtension,
    /// Extension-less files over 1 KiB starting with the PGDMP header.
    MagicHeader,
    /// File names that merely look like backups. Lowest confidence.
    NameHint,
}

const DISCOVERY_STAGES: [DiscoveryStage; 4] = [
    DiscoveryStage::DirectoryFormat,
    DiscoveryStage::KnownExtension,
    DiscoveryStage::MagicHeader,
    DiscoveryStage::NameHint,
];

impl DiscoveryStage {
    fn find(&self, files: &[Candidate]) -> Option<DetectedDump> {
        match self {
            DiscoveryStage::DirectoryFormat => files
                .iter()
                .filter(|c| c.path.file_name().is_some_and(|n| n == "toc.dat"))
                .min_by_key(|c| c.depth)
                .and_then(|c| c.path.parent())
                .map(|dir| DetectedDump {
                    path: dir.to_path_buf(),
                    format: DumpFormat::Directory,
                    priority: DIRECTORY_DUMP_PRIORITY,
                    size_bytes: dir_size(dir),
                }),
            DiscoveryStage::KnownExtension => {
                let ranked: Vec<(&Candidate, u32)> = files
                    .iter()
                    .filter_map(|c| extension_priority(&c.path).map(|p| (c, p)))
                    .collect();
                let best = ranked.iter().map(|(_, p)| *p).min()?;
                let chosen = largest(ranked.iter().filter(|(_, p)| *p == best).map(|(c, _)| *c))?;
                Some(DetectedDump {
                    path: chosen.path.clone(),
                    format: format::detect(&chosen.path),
                    priority: best,
                    size_bytes: chosen.size,
                })
            }
            DiscoveryStage::MagicHeader => files
                .iter()
                .filter(|c| c.path.extension().is_none() && c.size > MIN_MAGIC_CANDIDATE_SIZE)
                .find(|c| has_pgdmp_magic(&c.path))
                .map(|c| DetectedDump {
                    path: c.path.clone(),
                    format: DumpFormat::Custom,
                    priority: MAGIC_HEADER_PRIORITY,
                    size_bytes: c.size,
                }),
            DiscoveryStage::NameHint => {
                let hint = Regex::new(NAME_HINT_PATTERN).ok()?;
                files
                    .iter()
                    .filter(|c| c.size > 0)
                    .find(|c| {
                        c.path
                            .file_name()
                            .is_some_and(|n| hint.is_match(&n.to_string_lossy()))
                    })
                    .map(|c| DetectedDump {
                        path: c.path.clone(),
                        format: DumpFormat::Unknown,
                        priority: NAME_HINT_PRIORITY,
                        size_bytes: c.size,
                    })
            }
        }
    }
}

/// Same-priority tie-break: the largest file wins, then the shallowest, then path order.
fn largest<'c>(candidates: impl Iterator<Item = &'c Candidate>) -> Option<&'c Candidate> {
    candidates.min_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then(a.depth.cmp(&b.depth))
            .then(a.relative.cmp(&b.relative))
    })
}

/// Finds the most plausible dump under `root`.
pub fn discover_dump(root: &Path) -> Result<DetectedDump> {
    let files = collect_files(root)?;
    debug!("Discovery found {} files under {}", files.len(), root.display());

    for stage in DISCOVERY_STAGES {
        if let Some(dump) = stage.find(&files) {
            info!(
                "🔍 Selected dump {} (format: {}, priority: {}, stage: {:?})",
                dump.path.display(),
                dump.format,
                dump.priority,
                stage
            );
            if dump.format == DumpFormat::Unknown {
                warn!("⚠️ Dump chosen by file name only; it will be restored as SQL on a best-effort basis");
            }
            return Ok(dump);
        }
    }

    Err(RestoreError::NoDumpFound {
        root: root.to_path_buf(),
        files: files.into_iter().map(|c| c.relative).collect(),
    })
}

fn collect_files(root: &Path) -> Result<Vec<Candidate>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            RestoreError::Io(io::Error::other(format!(
                "Failed to walk directory {}: {}",
                root.display(),
                e
            )))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        // macOS resource forks shipped inside archives.
        if entry.file_name().to_string_lossy().starts_with("._") {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        files.push(Candidate {
            path: entry.path().to_path_buf(),
            relative,
            size,
            depth: entry.depth(),
        });
    }
    Ok(files)
}

fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
