//! Append-only registry of completed chunk files
//!
//! One line per completed chunk, in completion order. A chunk appears in the
//! registry if and only if its file is complete; entries are never rewritten
//! or removed, and [`ResumeRegistry::commit`] is the only mutator.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{ResumeError, ResumeResult};

/// In-memory view of a registry file
#[derive(Debug, Clone)]
pub struct ResumeRegistry {
    path: PathBuf,
    entries: Vec<String>,
    file_names: HashSet<String>,
}

impl ResumeRegistry {
    /// Load the registry at `path`
    ///
    /// A missing file is an empty registry. Blank lines are ignored and
    /// surrounding whitespace is trimmed.
    pub fn load(path: &Path) -> ResumeResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No registry found, starting fresh");
                String::new()
            }
            Err(e) => {
                return Err(ResumeError::IoError(format!(
                    "Failed to read registry {}: {e}",
                    path.display()
                )))
            }
        };

        let mut registry = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            file_names: HashSet::new(),
        };

        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            registry.remember(line.to_string());
        }

        if !registry.is_empty() {
            info!(
                path = %path.display(),
                completed_chunks = registry.len(),
                "Resume registry loaded"
            );
        }

        Ok(registry)
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered chunk identifiers, in completion order
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// First registered chunk, if any
    pub fn first(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    /// Number of completed chunks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no chunk has been completed yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the chunk at `chunk` is registered
    ///
    /// Chunks are matched by file name so the same output folder may be
    /// spelled differently between runs (`out/x` vs `./out/x`).
    pub fn is_registered(&self, chunk: &Path) -> bool {
        file_name_of(chunk).is_some_and(|name| self.file_names.contains(&name))
    }

    /// Record `chunk` as complete
    ///
    /// Appends one line and syncs it to disk; once this returns `Ok(true)` the
    /// chunk is permanently complete. Returns `Ok(false)` without touching the
    /// file when the chunk is already registered.
    pub fn commit(&mut self, chunk: &Path) -> ResumeResult<bool> {
        if self.is_registered(chunk) {
            debug!(chunk = %chunk.display(), "Chunk already registered, skipping commit");
            return Ok(false);
        }

        let entry = chunk.to_string_lossy().into_owned();
        if entry.contains('\n') {
            return Err(ResumeError::IoError(format!(
                "Chunk path contains a newline: {entry:?}"
            )));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ResumeError::IoError(format!(
                    "Failed to open registry {}: {e}",
                    self.path.display()
                ))
            })?;

        writeln!(file, "{entry}")
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                ResumeError::IoError(format!(
                    "Failed to append to registry {}: {e}",
                    self.path.display()
                ))
            })?;

        debug!(chunk = %entry, completed_chunks = self.len() + 1, "Chunk committed");
        self.remember(entry);
        Ok(true)
    }

    fn remember(&mut self, entry: String) {
        if let Some(name) = file_name_of(Path::new(&entry)) {
            self.file_names.insert(name);
        }
        self.entries.push(entry);
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
