//! Dump, snapshot and metadata commands

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use super::{CliError, LayersCommand, ValidateCommand};
use crate::catalog::LayerCatalog;
use crate::downloader::{
    BackoffPolicy, DumpError, DumpExecutor, DumpJob, JobProgress, SnapshotDumper, SnapshotSummary,
};
use crate::output::{write_json_pretty, LayerPaths};
use crate::shutdown::SharedShutdown;
use crate::source::arcgis::ArcGisSource;
use crate::source::FeatureSource;

/// Default output folder of the dump command
pub const DEFAULT_OUTPUT: &str = "outputs/buildings";

/// Default chunk size of the dump command
pub const DEFAULT_CLI_CHUNK_SIZE: u64 = 350;

/// Default per-request timeout of the CLI, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Parse a `key=value` query parameter
fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' is not of the form key=value"))?;
    if key.trim().is_empty() {
        return Err(format!("'{s}' has an empty key"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Timeout in seconds; 0 disables it
fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load the catalog from `path`, or the embedded one
pub fn load_catalog(path: Option<&Path>) -> Result<LayerCatalog, CliError> {
    Ok(match path {
        Some(path) => LayerCatalog::from_path(path)?,
        None => LayerCatalog::load_embedded()?,
    })
}

/// Layer Dumper CLI
#[derive(Parser, Debug)]
#[command(name = "layer-dumper")]
#[command(about = "Dump ArcGIS map-server layers into resumable GeoJSON-lines chunks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output_format: OutputFormat,

    /// Layer catalog JSON file (defaults to the embedded catalog)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resumable chunked dump of a layer
    Dump(DumpArgs),

    /// One-shot dump of a layer into a single GeoJSON file
    Snapshot(SnapshotArgs),

    /// Fetch and save layer metadata
    Metadata(MetadataArgs),

    /// List catalog layers
    Layers(LayersCommand),

    /// Check the resume registry of a dump
    Validate(ValidateCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

/// Where a layer is read from
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Layer name from the catalog
    #[arg(long, default_value = "buildings")]
    pub layer: String,

    /// Read from the alternate map server (`--use-alt false` to disable)
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub use_alt: bool,

    /// Per-request timeout in seconds (0 disables it)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

impl SourceArgs {
    /// Per-request timeout
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout)
    }

    /// Build the map-server source for this layer
    pub fn build_source(&self, cli: &Cli) -> Result<ArcGisSource, CliError> {
        let catalog = load_catalog(cli.catalog.as_deref())?;
        let url = catalog.layer_url(&self.layer, self.use_alt)?;
        info!(layer = %self.layer, url = %url, use_alt = self.use_alt, "Resolved layer");
        Ok(ArcGisSource::new(url, self.timeout())?)
    }
}

/// Arguments of the dump command
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Layer selection
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output folder for chunks, registry and metadata
    #[arg(short = 'o', long, alias = "outfolderpath", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Features per chunk file
    #[arg(long, default_value_t = DEFAULT_CLI_CHUNK_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunksize: u64,

    /// Features requested per page
    #[arg(long, default_value_t = crate::downloader::config::DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    pub page_size: u64,

    /// Extra query parameter passed to the map server (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Stop after this many consecutive failed attempts (default: retry forever)
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl DumpArgs {
    /// Build the dump job described by the arguments
    pub fn job(&self) -> DumpJob {
        let mut job = DumpJob::new(&self.source.layer, &self.output)
            .with_chunk_size(self.chunksize)
            .with_page_size(self.page_size)
            .with_timeout(self.source.timeout())
            .with_alt(self.source.use_alt);
        job.extra_params = self.params.clone();
        job
    }

    /// Execute the dump command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let mut job = self.job();
        job.validate()?;
        let source = self.source.build_source(cli)?;

        let mut backoff = BackoffPolicy::default();
        backoff.max_attempts = self.max_attempts;

        let progress = create_progress_bar(&format!("Dumping {}", job.layer));
        let executor = DumpExecutor::new()
            .with_backoff(backoff)
            .with_shutdown(shutdown)
            .with_progress_bar(progress.clone());

        info!(layer = %job.layer, output = %job.output_folder.display(), "Starting dump");
        let result = executor.execute(&mut job, &source).await;
        progress.finish_and_clear();

        match cli.output_format {
            OutputFormat::Json => output_json(&job, &result),
            OutputFormat::Human => output_human(&job, &result),
        }

        result.map(|_| ()).map_err(CliError::DumpError)
    }
}

/// Arguments of the snapshot command
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Layer selection
    #[command(flatten)]
    pub source: SourceArgs,

    /// GeoJSON file to write (metadata goes to `<stem>_metadata.json`)
    #[arg(long)]
    pub file: PathBuf,

    /// Features requested per page
    #[arg(long, default_value_t = crate::downloader::config::DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    pub page_size: u64,

    /// Extra query parameter passed to the map server (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

impl SnapshotArgs {
    /// Execute the snapshot command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let source = self.source.build_source(cli)?;
        let progress = create_progress_bar(&format!("Snapshot of {}", self.source.layer));

        let result = SnapshotDumper::new()
            .with_page_size(self.page_size)
            .with_timeout(self.source.timeout())
            .with_params(self.params.clone())
            .with_progress_bar(progress.clone())
            .dump(&source, &self.file)
            .await;
        progress.finish_and_clear();

        let summary = result?;
        print_snapshot(cli.output_format, &summary);
        Ok(())
    }
}

/// Arguments of the metadata command
#[derive(Args, Debug)]
pub struct MetadataArgs {
    /// Layer selection
    #[command(flatten)]
    pub source: SourceArgs,

    /// Folder to write `{layer}_metadata.json` into (prints to stdout if omitted)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl MetadataArgs {
    /// Execute the metadata command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let source = self.source.build_source(cli)?;
        let metadata = source.metadata().await?;

        match &self.output {
            Some(folder) => {
                let path = LayerPaths::new(folder, &self.source.layer).metadata_path();
                write_json_pretty(&path, &metadata)?;
                println!("Metadata written to {}", path.display());
            }
            None => {
                let text = serde_json::to_string_pretty(&metadata).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to render metadata: {e}"))
                })?;
                println!("{text}");
            }
        }
        Ok(())
    }
}

fn output_json(job: &DumpJob, result: &Result<JobProgress, DumpError>) {
    let output = serde_json::json!({
        "success": result.is_ok(),
        "layer": job.layer,
        "output": job.output_folder.display().to_string(),
        "status": format!("{:?}", job.status),
        "start_idx": job.progress.start_idx,
        "position": job.progress.position,
        "total_features": job.progress.total_features,
        "features_written": job.progress.features_written,
        "chunks_committed": job.progress.chunks_committed,
        "chunks_cleaned": job.progress.chunks_cleaned,
        "retries": job.progress.retries,
        "error": result.as_ref().err().map(|e| e.to_string()),
    });
    println!("{output}");
}

fn output_human(job: &DumpJob, result: &Result<JobProgress, DumpError>) {
    match result {
        Ok(progress) => {
            println!("\nDump of {} completed successfully!", job.layer);
            println!("Output: {}", job.output_folder.display());
            println!("Resumed at: {}", progress.start_idx);
            println!("Features written: {}", progress.features_written);
            println!("Chunks committed: {}", progress.chunks_committed);
            if progress.chunks_cleaned > 0 {
                println!("Stale chunks removed: {}", progress.chunks_cleaned);
            }
            if progress.retries > 0 {
                println!("Retries: {}", progress.retries);
            }
        }
        Err(DumpError::Cancelled) => {
            println!("\nDump of {} stopped; run the same command again to resume.", job.layer);
            println!("Features written: {}", job.progress.features_written);
        }
        Err(e) => {
            eprintln!("\nDump of {} failed!", job.layer);
            eprintln!("Error: {e}");
            error!("Dump failed: {}", e);
        }
    }
}

fn print_snapshot(format: OutputFormat, summary: &SnapshotSummary) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "success": true,
                "file": summary.path.display().to_string(),
                "metadata": summary.metadata_path.display().to_string(),
                "features": summary.features,
                "total_features": summary.total,
            })
        ),
        OutputFormat::Human => {
            println!("\nSnapshot written to {}", summary.path.display());
            println!("Metadata: {}", summary.metadata_path.display());
            println!("Features: {}", summary.features);
        }
    }
}

/// Progress bar with the crate's style; a spinner until the total is known
fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}
