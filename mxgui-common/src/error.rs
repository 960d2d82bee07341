//! Common error types for the MXGUI bootstrapper

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for MXGUI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the bootstrapper crates
///
/// Everything here is fatal at startup: without a configuration and a
/// mixer list the run cannot proceed.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inventory file could not be read
    #[error("Inventory not readable at {path}: {source}")]
    InventoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Inventory file content is malformed
    #[error("Malformed inventory: {0}")]
    InventoryMalformed(String),
}
