//! Resume capability for layer dumps
//!
//! A dump can be interrupted at any point (crash, Ctrl+C, network outage).
//! Progress survives through the resume registry: an append-only text file
//! listing, in completion order, every chunk file that was fully written.
//!
//! - [`registry`] - the ledger itself (`load`, `commit`)
//! - [`state`] - where to restart, derived from the ledger and the first chunk
//! - [`lock`] - advisory lock preventing two dumps of one layer into one folder

pub mod lock;
pub mod registry;
pub mod state;

pub use lock::DumpLock;
pub use registry::ResumeRegistry;
pub use state::RunState;

/// Errors related to resume bookkeeping
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Lock file could not be opened or locked
    #[error("lock error: {0}")]
    LockError(String),

    /// Another process is already dumping into the folder
    #[error("output folder is locked by another dump: {0}")]
    AlreadyLocked(String),
}

/// Result type for resume operations
pub type ResumeResult<T> = Result<T, ResumeError>;
