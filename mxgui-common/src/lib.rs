//! # MXGUI Common Library
//!
//! Shared code for the MXGUI bootstrapper:
//! - Mixer inventory model and loader
//! - Bootstrap configuration (TOML) and its resolution order
//! - Run report types produced at the end of every run
//! - Common error type

pub mod config;
pub mod error;
pub mod inventory;
pub mod report;

pub use config::BootstrapConfig;
pub use error::{Error, Result};
pub use inventory::{Inventory, Mixer, ModelType};
pub use report::RunReport;
