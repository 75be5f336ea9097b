//! TSM Common Library
//!
//! Shared error handling and logging for the TSM workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the `MigrateError` taxonomy and `Result` alias
//! - **Logging**: `tracing` subscriber initialization from `TSM_LOG_*`

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{MigrateError, Result};
