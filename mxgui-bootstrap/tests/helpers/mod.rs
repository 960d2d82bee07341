//! Test Helper Utilities
//!
//! Shared fixtures for the mxgui-bootstrap integration suites

#![allow(dead_code)]

pub mod fakes;
pub mod log_capture;

pub use fakes::{
    reachable_address, unreachable_address, FakeConnector, LiveMixer, RecordingRunner, SENTINEL,
    STALL,
};
pub use log_capture::{init_test_logging, LogCapture};

use mxgui_common::BootstrapConfig;
use std::path::Path;

/// Configuration rooted at `work_dir` with short test timeouts
pub fn test_config(work_dir: &Path) -> BootstrapConfig {
    let mut config = BootstrapConfig::default();
    config.work_dir = work_dir.to_path_buf();
    config.probe.timeout_ms = 500;
    config.probe.max_concurrency = 4;
    config.transfer.timeout_secs = 5;
    config
}

/// Write a dummy appliance image into `dir`
pub fn write_image(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"appliance").unwrap();
    path
}

/// Non-empty lines of a fragment file
pub fn fragment_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
