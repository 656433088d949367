//! JSON documents written next to the feature data
//!
//! Both writers stage their output in a temporary file in the destination
//! folder and rename it into place, so a reader never observes a half-written
//! document.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{io_error, FeatureWriter, OutputError, OutputResult};
use crate::FeatureRecord;

const JSON_INDENT: &[u8] = b"    ";

/// Write `value` to `path` as 4-space indented JSON, replacing any previous file
///
/// Non-ASCII text is written verbatim.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> OutputResult<()> {
    let mut tmp = staging_file(path)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut serializer =
            Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(JSON_INDENT));
        value
            .serialize(&mut serializer)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| io_error("Failed to write", path, e))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error("Failed to sync", path, e))?;
    tmp.persist(path)
        .map_err(|e| io_error("Failed to persist", path, e.error))?;

    debug!(path = %path.display(), "JSON document written");
    Ok(())
}

/// Streams features into a single GeoJSON `FeatureCollection` document
pub struct FeatureCollectionWriter {
    path: PathBuf,
    writer: BufWriter<NamedTempFile>,
    count: u64,
}

impl FeatureCollectionWriter {
    /// Start a collection that will be placed at `path` by [`finish`](Self::finish)
    pub fn create(path: &Path) -> OutputResult<Self> {
        let tmp = staging_file(path)?;
        let mut writer = BufWriter::new(tmp);
        writer
            .write_all(br#"{"type":"FeatureCollection","features":["#)
            .map_err(|e| io_error("Failed to write", path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            count: 0,
        })
    }

    /// Close the collection and move it into place
    ///
    /// Returns the number of features in the document. Dropping the writer
    /// without calling this discards the partial output.
    pub fn finish(mut self) -> OutputResult<u64> {
        self.writer
            .write_all(b"\n]}\n")
            .map_err(|e| io_error("Failed to write", &self.path, e))?;

        let tmp = self
            .writer
            .into_inner()
            .map_err(|e| io_error("Failed to flush", &self.path, e.into_error()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_error("Failed to sync", &self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| io_error("Failed to persist", &self.path, e.error))?;

        debug!(path = %self.path.display(), features = self.count, "Feature collection written");
        Ok(self.count)
    }
}

impl FeatureWriter for FeatureCollectionWriter {
    fn write_feature(&mut self, record: &FeatureRecord) -> OutputResult<()> {
        let line = record
            .to_line()
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        let separator: &[u8] = if self.count == 0 { b"\n" } else { b",\n" };

        self.writer
            .write_all(separator)
            .and_then(|_| self.writer.write_all(line.as_bytes()))
            .map_err(|e| io_error("Failed to write", &self.path, e))?;

        self.count += 1;
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| io_error("Failed to flush", &self.path, e))
    }

    fn features_written(&self) -> u64 {
        self.count
    }
}

fn staging_file(path: &Path) -> OutputResult<NamedTempFile> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
    NamedTempFile::new_in(parent).map_err(|e| io_error("Failed to create temp file in", parent, e))
}
