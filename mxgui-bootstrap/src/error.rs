//! Error types for mxgui-bootstrap
//!
//! Only [`BootstrapError`] ends a run. Per-mixer, per-file and per-image
//! failures have their own error types in the service modules and are
//! recorded in the run report instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration or inventory problem
    #[error(transparent)]
    Common(#[from] mxgui_common::Error),

    /// Work directory missing or unusable
    #[error("Work directory {path} unusable: {source}")]
    WorkDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The barrier was crossed with the live set still shared
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for fatal run errors
pub type BootstrapResult<T> = Result<T, BootstrapError>;
