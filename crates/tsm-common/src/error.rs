//! Error types for TSM
//!
//! Single-entry decode faults are deliberately not represented here: the
//! decoder reports them as a `Skip` outcome and keeps going. Only failures
//! that end a file, a batch, or the whole run become errors.

use thiserror::Error;

/// Result type alias for TSM operations
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Main error type for TSM
///
/// Storage listing/download failures travel as `anyhow` errors with
/// context at the orchestrator level rather than a variant here.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Corrupt log file {path}: {reason}")]
    FileCorruption { path: String, reason: String },

    #[error("Ingestion failed for table {table}: {reason}")]
    Ingestion { table: String, reason: String },

    #[error("Progress store error: {0}")]
    ProgressStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration is disabled (set TSM_MIGRATION_ENABLED=true to run)")]
    Disabled,
}
