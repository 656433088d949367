//! Advisory lock on a layer's output folder
//!
//! Two dumps of the same layer into the same folder would interleave chunk
//! writes and registry lines. The lock is taken with fd-lock before any file
//! is touched and held for the whole run.

use super::{ResumeError, ResumeResult};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock held for the duration of a dump
#[derive(Debug)]
pub struct DumpLock {
    path: PathBuf,
    // closing the file releases the lock
    _lock: RwLock<File>,
}

impl DumpLock {
    /// Try to lock `path` without blocking
    ///
    /// Fails with [`ResumeError::AlreadyLocked`] if another process holds it.
    /// On success the lock file records the holder's pid and start time.
    pub fn try_acquire(path: &Path) -> ResumeResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);

        match lock.try_write() {
            Ok(mut guard) => {
                write_holder(&mut guard).map_err(|e| {
                    ResumeError::LockError(format!("Failed to write lock file: {e}"))
                })?;
                // the guard would unlock on drop; the lock must outlive this call
                std::mem::forget(guard);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(ResumeError::AlreadyLocked(path.display().to_string()));
            }
            Err(e) => {
                return Err(ResumeError::LockError(format!("Failed to acquire lock: {e}")));
            }
        }

        debug!(path = %path.display(), "Dump lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(
        file,
        "pid={} started={}",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    )
}
