//! Where a dump restarts
//!
//! The remote offset to resume from is derived, never stored: every
//! registered chunk holds exactly as many records as the first one, so
//! `start_idx = completed_chunks * records_in_first_chunk`.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{ResumeError, ResumeRegistry, ResumeResult};
use crate::output::chunk::count_records;

/// Restart position computed from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    /// Number of completed chunks
    pub n_chunks: u64,
    /// Records in the first completed chunk, when it could be read
    pub resumed_chunk_size: Option<u64>,
    /// Remote offset of the first feature to request
    pub start_idx: u64,
    /// Index of the chunk file that receives the next feature
    pub next_chunk_index: u64,
}

impl RunState {
    /// State of a dump that has not completed any chunk
    pub fn fresh() -> Self {
        Self {
            n_chunks: 0,
            resumed_chunk_size: None,
            start_idx: 0,
            next_chunk_index: 0,
        }
    }

    /// Derive the restart position from `registry`
    ///
    /// Registered paths that no longer resolve are looked up by file name in
    /// `output_dir`. When the first chunk is missing or empty the offset
    /// cannot be reconstructed: the dump restarts from offset 0 while chunk
    /// numbering continues after the registered chunks.
    pub fn derive(registry: &ResumeRegistry, output_dir: &Path) -> ResumeResult<Self> {
        let Some(first) = registry.first() else {
            return Ok(Self::fresh());
        };

        let n_chunks = registry.len() as u64;
        let first_path = resolve_entry(first, output_dir);

        let resumed_chunk_size = match count_records(&first_path) {
            Ok(0) => {
                warn!(chunk = %first_path.display(), "First registered chunk is empty, restarting from offset 0");
                None
            }
            Ok(n) => Some(n),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(chunk = %first_path.display(), "First registered chunk is missing, restarting from offset 0");
                None
            }
            Err(e) => {
                return Err(ResumeError::IoError(format!(
                    "Failed to read {}: {e}",
                    first_path.display()
                )))
            }
        };

        let state = Self {
            n_chunks,
            resumed_chunk_size,
            start_idx: resumed_chunk_size.map_or(0, |size| n_chunks * size),
            next_chunk_index: n_chunks,
        };

        info!(
            n_chunks = state.n_chunks,
            chunk_size = ?state.resumed_chunk_size,
            start_idx = state.start_idx,
            "Resuming dump"
        );

        Ok(state)
    }

    /// Chunk size to use for this run
    ///
    /// A resumed dump keeps the size its first chunk was written with; a
    /// differing `configured` size would misalign the derived offset.
    pub fn effective_chunk_size(&self, configured: u64) -> u64 {
        match self.resumed_chunk_size {
            Some(resumed) if resumed != configured => {
                warn!(
                    configured,
                    resumed,
                    "Configured chunk size differs from the resumed dump, keeping the resumed size"
                );
                resumed
            }
            Some(resumed) => resumed,
            None => configured,
        }
    }

    /// Whether there is anything to resume from
    pub fn is_resumed(&self) -> bool {
        self.n_chunks > 0
    }
}

/// Locate a registry entry, falling back to its file name inside `output_dir`
pub(crate) fn resolve_entry(entry: &str, output_dir: &Path) -> PathBuf {
    let path = PathBuf::from(entry);
    if path.exists() {
        return path;
    }
    match path.file_name() {
        Some(name) => output_dir.join(name),
        None => path,
    }
}
