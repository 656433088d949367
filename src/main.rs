//! Main entry point for the layer-dumper CLI

use anyhow::Context;
use clap::Parser;
use layer_dumper::cli::{Cli, CliError, Commands};
use layer_dumper::shutdown::{self, ShutdownCoordinator};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Exit code of a dump stopped with Ctrl+C
const EXIT_CANCELLED: i32 = 130;

/// Initialize tracing, optionally as JSON (`LOG_FORMAT=json`) and into a file
fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("layer_dumper=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
            if json_format {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if json_format {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::install_ctrl_c_handler(shutdown.clone());

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = layer_dumper::metrics::init_metrics(addr) {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let result: Result<(), CliError> = match &cli.command {
        Commands::Dump(args) => args.execute(&cli, shutdown.clone()).await,
        Commands::Snapshot(args) => args.execute(&cli).await,
        Commands::Metadata(args) => args.execute(&cli).await,
        Commands::Layers(cmd) => cmd.execute(&cli).await,
        Commands::Validate(cmd) => cmd.execute(cli.output_format).await,
    };

    if let Err(e) = result {
        if e.is_cancelled() {
            std::process::exit(EXIT_CANCELLED);
        }
        error!("Command failed: {}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
