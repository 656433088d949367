//! Validation subcommand: resume registry integrity

use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use super::dump::DEFAULT_OUTPUT;
use super::{CliError, OutputFormat};
use crate::output::chunk::count_records;
use crate::output::LayerPaths;
use crate::resume::state::resolve_entry;
use crate::resume::{ResumeRegistry, RunState};

/// Check that every registered chunk exists and has the same size
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Layer name
    #[arg(long, default_value = "buildings")]
    pub layer: String,

    /// Output folder of the dump
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
}

/// Problems found in one registered chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkIssue {
    /// Registry entry
    pub entry: String,
    /// What is wrong with it
    pub problem: String,
}

/// Outcome of a registry check
#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    /// Registry file
    pub registry: PathBuf,
    /// Completed chunks
    pub completed_chunks: u64,
    /// Records per chunk, from the first chunk
    pub chunk_size: Option<u64>,
    /// Offset the next dump resumes from
    pub resume_offset: u64,
    /// Chunk files on disk that the next dump will delete
    pub unregistered: Vec<PathBuf>,
    /// Registered chunks that are missing or have the wrong size
    pub issues: Vec<ChunkIssue>,
}

impl RegistryReport {
    /// Whether the registry can be trusted for resuming
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Inspect the registry and chunk files of one layer
pub fn check_registry(paths: &LayerPaths) -> Result<RegistryReport, CliError> {
    let registry = ResumeRegistry::load(&paths.registry_path())?;
    let state = RunState::derive(&registry, paths.folder())?;

    let mut issues = Vec::new();
    for entry in registry.entries() {
        let path = resolve_entry(entry, paths.folder());
        match count_records(&path) {
            Ok(count) if Some(count) == state.resumed_chunk_size => {}
            Ok(count) => issues.push(ChunkIssue {
                entry: entry.clone(),
                problem: match state.resumed_chunk_size {
                    Some(expected) => format!("holds {count} records, expected {expected}"),
                    None => format!("holds {count} records but the first chunk is unusable"),
                },
            }),
            Err(e) => issues.push(ChunkIssue {
                entry: entry.clone(),
                problem: format!("cannot be read: {e}"),
            }),
        }
    }

    let mut unregistered = Vec::new();
    if let Ok(dir) = std::fs::read_dir(paths.folder()) {
        for item in dir.flatten() {
            let name = item.file_name().to_string_lossy().into_owned();
            if paths.chunk_index(&name).is_some() && !registry.is_registered(&item.path()) {
                unregistered.push(item.path());
            }
        }
    }
    unregistered.sort();

    Ok(RegistryReport {
        registry: paths.registry_path(),
        completed_chunks: state.n_chunks,
        chunk_size: state.resumed_chunk_size,
        resume_offset: state.start_idx,
        unregistered,
        issues,
    })
}

impl ValidateCommand {
    /// Execute the validation command
    pub async fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let report = check_registry(&LayerPaths::new(&self.output, &self.layer))?;

        match format {
            OutputFormat::Json => {
                let text = serde_json::to_string_pretty(&report).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize report: {e}"))
                })?;
                println!("{text}");
            }
            OutputFormat::Human => {
                println!("Registry: {}", report.registry.display());
                println!("  Completed chunks: {}", report.completed_chunks);
                match report.chunk_size {
                    Some(size) => println!("  Records per chunk: {size}"),
                    None => println!("  Records per chunk: unknown"),
                }
                println!("  Resume offset: {}", report.resume_offset);
                for path in &report.unregistered {
                    println!("  - {} (unregistered, removed on next dump)", path.display());
                }
                for issue in &report.issues {
                    println!("  - {} ({})", issue.entry, issue.problem);
                }
            }
        }

        if !report.is_valid() {
            return Err(CliError::ValidationFailed(format!(
                "{} registered chunk(s) are missing or inconsistent",
                report.issues.len()
            )));
        }
        Ok(())
    }
}
