//! CLI command listing the layers of the catalog

use clap::Args;
use serde_json::json;

use super::dump::load_catalog;
use super::{CliError, Cli, OutputFormat};

/// List catalog layers and their map-server URLs
#[derive(Debug, Args)]
pub struct LayersCommand {
    /// Only list layers whose name contains this text
    pub filter: Option<String>,
}

impl LayersCommand {
    /// Execute the layers command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let catalog = load_catalog(cli.catalog.as_deref())?;

        let mut rows = Vec::new();
        for entry in catalog.entries() {
            if let Some(filter) = &self.filter {
                if !entry.name().contains(filter.as_str()) {
                    continue;
                }
            }
            let primary = catalog.layer_url(entry.name(), false)?;
            let alternate = match entry.alt_layer_id() {
                Some(_) => Some(catalog.layer_url(entry.name(), true)?.to_string()),
                None => None,
            };
            rows.push(json!({
                "layer": entry.name(),
                "layer_id": entry.layer_id(),
                "alt_layer_id": entry.alt_layer_id(),
                "description": entry.description(),
                "url": primary.to_string(),
                "alt_url": alternate,
            }));
        }

        match cli.output_format {
            OutputFormat::Json => {
                let text = serde_json::to_string_pretty(&rows).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize layers: {e}"))
                })?;
                println!("{text}");
            }
            OutputFormat::Human => {
                println!(
                    "Found {} layer(s) (catalog schema {}):\n",
                    rows.len(),
                    catalog.schema_version()
                );
                for row in &rows {
                    println!(
                        "{} | id={} | alt={} | {}",
                        row["layer"].as_str().unwrap_or_default(),
                        row["layer_id"].as_str().unwrap_or_default(),
                        row["alt_layer_id"].as_str().unwrap_or("-"),
                        row["description"].as_str().unwrap_or_default(),
                    );
                    println!("    {}", row["url"].as_str().unwrap_or_default());
                    if let Some(alt) = row["alt_url"].as_str() {
                        println!("    {alt}");
                    }
                }
            }
        }

        Ok(())
    }
}
