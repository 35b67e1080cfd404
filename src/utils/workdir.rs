// dbrestore/src/utils/workdir.rs
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::{Builder as TempFileBuilder, TempDir};
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Per-run scratch directory for downloads and extracted archives.
///
/// Removed exactly once: on an explicit `cleanup()`, when dropped, or from the interrupt
/// watcher, whichever comes first.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    handle: CleanupHandle,
}

/// Shareable handle that can remove the work directory from another task.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    dir: Arc<Mutex<Option<TempDir>>>,
}

impl WorkDir {
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = TempFileBuilder::new();
        builder.prefix("dbrestore_");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!("Work directory created at {}", path.display());

        Ok(Self {
            path,
            handle: CleanupHandle {
                dir: Arc::new(Mutex::new(Some(dir))),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates (if needed) and returns a named subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.path.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn handle(&self) -> CleanupHandle {
        self.handle.clone()
    }

    pub fn cleanup(&self) -> bool {
        self.handle.cleanup()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        self.handle.cleanup();
    }
}

impl CleanupHandle {
    /// Returns true only for the call that actually removed the directory.
    pub fn cleanup(&self) -> bool {
        let taken = match self.dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(dir) => {
                let path = dir.path().to_path_buf();
                match dir.close() {
                    Ok(()) => info!("🧹 Removed temporary directory {}", path.display()),
                    Err(e) => warn!("⚠️ Failed to remove temporary directory {}: {}", path.display(), e),
                }
                true
            }
            None => false,
        }
    }
}

/// Spawns a task that removes the work directory and exits with status 130 on Ctrl-C or
/// SIGTERM. Blocking tool invocations on the main task do not delay it.
pub fn spawn_interrupt_cleanup(handle: CleanupHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("⚠️ Interrupt received, cleaning up before exit...");
        handle.cleanup();
        std::process::exit(130);
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("⚠️ Could not install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_runs_once() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = WorkDir::create(Some(root.path()))?;
        let path = work.path().to_path_buf();
        std::fs::write(work.subdir("extract")?.join("dump.sql"), "SELECT 1;")?;

        let handle = work.handle();
        assert!(handle.cleanup());
        assert!(!path.exists());
        assert!(!work.cleanup());
        drop(work);
        assert!(!handle.cleanup());
        Ok(())
    }

    #[test]
    fn drop_removes_directory() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let path = {
            let work = WorkDir::create(Some(root.path()))?;
            work.path().to_path_buf()
        };
        assert!(!path.exists());
        Ok(())
    }
}
