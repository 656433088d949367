//! GeoJSON-lines chunk files
//!
//! A chunk is an append-only file holding one serialized feature per line.
//! The writer keeps exactly one chunk open; the executor decides when to roll
//! over (see [`should_rollover`]) and commits the finished chunk to the resume
//! registry before the next one is opened.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{io_error, FeatureWriter, LayerPaths, OutputError, OutputResult};
use crate::FeatureRecord;

/// Whether the feature at running index `index` starts a new chunk
///
/// A new chunk begins when `index` is a multiple of `chunk_size` and strictly
/// after `start_idx`, so a resumed run keeps writing the chunk it starts in.
pub fn should_rollover(index: u64, start_idx: u64, chunk_size: u64) -> bool {
    chunk_size > 0 && index % chunk_size == 0 && index > start_idx
}

/// Number of records (non-blank lines) in a chunk file
pub fn count_records(path: &Path) -> std::io::Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Delete this layer's chunk files that `is_registered` does not accept
///
/// Files of other layers and anything that is not a chunk are left alone.
/// Returns the deleted paths, in chunk order.
pub fn cleanup_unregistered(
    paths: &LayerPaths,
    is_registered: impl Fn(&Path) -> bool,
) -> OutputResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(paths.folder()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("Failed to list", paths.folder(), e)),
    };

    let mut stale = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error("Failed to list", paths.folder(), e))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = paths.chunk_index(&file_name) else {
            continue;
        };
        let path = entry.path();
        if path.is_file() && !is_registered(&path) {
            stale.push((index, path));
        }
    }
    stale.sort();

    let mut removed = Vec::with_capacity(stale.len());
    for (_, path) in stale {
        warn!(chunk = %path.display(), "Deleting unregistered chunk left by an interrupted run");
        std::fs::remove_file(&path).map_err(|e| io_error("Failed to delete", &path, e))?;
        removed.push(path);
    }

    if !removed.is_empty() {
        info!(layer = paths.layer(), removed = removed.len(), "Cleanup complete");
    }
    Ok(removed)
}

/// Appends features to the current chunk file of a layer
pub struct ChunkWriter {
    paths: LayerPaths,
    chunk_index: u64,
    current: Option<BufWriter<File>>,
    records_in_chunk: u64,
    features_written: u64,
}

impl ChunkWriter {
    /// Writer that starts appending to chunk `chunk_index`
    ///
    /// No file is created until the first feature is written.
    pub fn new(paths: LayerPaths, chunk_index: u64) -> Self {
        Self {
            paths,
            chunk_index,
            current: None,
            records_in_chunk: 0,
            features_written: 0,
        }
    }

    /// Index of the chunk currently being written
    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    /// Path of the chunk currently being written
    pub fn current_path(&self) -> PathBuf {
        self.paths.chunk_path(self.chunk_index)
    }

    /// Records appended to the current chunk by this writer
    pub fn records_in_chunk(&self) -> u64 {
        self.records_in_chunk
    }

    /// Close the current chunk and move on to the next index
    ///
    /// The finished file is flushed and synced before its path is returned,
    /// so it can be committed to the registry straight away.
    pub fn roll_over(&mut self) -> OutputResult<PathBuf> {
        let finished = self.current_path();
        self.sync_current()?;
        self.current = None;

        debug!(
            chunk = %finished.display(),
            records = self.records_in_chunk,
            "Chunk finished"
        );

        self.chunk_index += 1;
        self.records_in_chunk = 0;
        Ok(finished)
    }

    /// Flush and close the current chunk without rolling over
    ///
    /// Returns the path of the tail chunk if this writer wrote to it.
    pub fn close(mut self) -> OutputResult<Option<PathBuf>> {
        if self.current.is_none() {
            return Ok(None);
        }
        self.sync_current()?;
        Ok(Some(self.current_path()))
    }

    fn open_chunk_file(&self) -> OutputResult<BufWriter<File>> {
        let path = self.current_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error("Failed to open", &path, e))?;

        debug!(chunk = %path.display(), "Chunk opened");
        Ok(BufWriter::new(file))
    }

    fn sync_current(&mut self) -> OutputResult<()> {
        let path = self.current_path();
        if let Some(writer) = self.current.as_mut() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_data())
                .map_err(|e| io_error("Failed to sync", &path, e))?;
        }
        Ok(())
    }
}

impl FeatureWriter for ChunkWriter {
    fn write_feature(&mut self, record: &FeatureRecord) -> OutputResult<()> {
        let mut line = record
            .to_line()
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        line.push('\n');

        let writer = match self.current.take() {
            Some(writer) => writer,
            None => self.open_chunk_file()?,
        };
        let path = self.current_path();
        self.current
            .insert(writer)
            .write_all(line.as_bytes())
            .map_err(|e| io_error("Failed to append to", &path, e))?;

        self.records_in_chunk += 1;
        self.features_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.sync_current()
    }

    fn features_written(&self) -> u64 {
        self.features_written
    }
}
