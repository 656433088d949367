//! CLI command implementations

pub mod dump;
pub mod error;
pub mod layers;
pub mod validate;

pub use dump::{Cli, Commands, DumpArgs, MetadataArgs, OutputFormat, SnapshotArgs};
pub use error::CliError;
pub use layers::LayersCommand;
pub use validate::ValidateCommand;
