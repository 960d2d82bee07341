//! Configuration loading and resolution
//!
//! The bootstrapper reads one TOML file. Which file is used follows this
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. `MXGUI_CONFIG` environment variable
//! 3. `mxgui-bootstrap.toml` in the current directory
//! 4. Compiled defaults (fallback)
//!
//! Every key is optional; missing keys take the compiled default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "MXGUI_CONFIG";

/// Configuration file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "mxgui-bootstrap.toml";

/// Upper bound accepted for `probe.max_concurrency`
pub const MAX_CONCURRENCY: usize = 1024;

/// Where the configuration was taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    WorkingDirectory(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::WorkingDirectory(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolve the configuration file following the priority order above
pub fn resolve_config_source(cli_arg: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    // Priority 3: File in the current directory
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return ConfigSource::WorkingDirectory(local);
    }

    // Priority 4: Compiled defaults
    ConfigSource::Defaults
}

/// Load the configuration named by `source`
///
/// A file named explicitly (command line or environment) must exist. Any
/// file that exists must parse.
pub fn load_config(source: &ConfigSource) -> Result<BootstrapConfig> {
    let config = match source {
        ConfigSource::CommandLine(path) | ConfigSource::Environment(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            BootstrapConfig::load(path)?
        }
        ConfigSource::WorkingDirectory(path) => BootstrapConfig::load(path)?,
        ConfigSource::Defaults => {
            warn!(
                "No {} found and {} not set, using compiled defaults",
                DEFAULT_CONFIG_FILE, CONFIG_ENV_VAR
            );
            BootstrapConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Top-level bootstrap configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Directory every relative path below is resolved against
    pub work_dir: PathBuf,
    /// Mixer inventory (YAML)
    pub inventory: PathBuf,
    pub probe: ProbeConfig,
    pub transfer: TransferConfig,
    pub hypervisor: HypervisorConfig,
    pub paths: PathsConfig,
    pub emitter: EmitterConfig,
    pub logging: LoggingConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            inventory: PathBuf::from("config.yaml"),
            probe: ProbeConfig::default(),
            transfer: TransferConfig::default(),
            hypervisor: HypervisorConfig::default(),
            paths: PathsConfig::default(),
            emitter: EmitterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BootstrapConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))
    }

    /// Reject values the run cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.probe.timeout_ms == 0 {
            return Err(Error::Config("probe.timeout_ms must be positive".to_string()));
        }
        if self.probe.max_concurrency == 0 || self.probe.max_concurrency > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "probe.max_concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }
        if self.transfer.timeout_secs == 0 {
            return Err(Error::Config(
                "transfer.timeout_secs must be positive".to_string(),
            ));
        }
        if self.transfer.remote_dir.trim().is_empty() {
            return Err(Error::Config("transfer.remote_dir is empty".to_string()));
        }
        if self.hypervisor.program.trim().is_empty() {
            return Err(Error::Config("hypervisor.program is empty".to_string()));
        }
        Ok(())
    }

    /// Resolve `path` against the work directory unless it is absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.resolve(&self.inventory)
    }
}

/// Liveness probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// TCP port dialed when the address carries none
    pub port: u16,
    pub timeout_ms: u64,
    /// Upper bound on mixers probed and backed up at the same time
    pub max_concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 80,
            timeout_ms: 1000,
            max_concurrency: 32,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backup file-transfer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Directory mirrored from every live mixer
    pub remote_dir: String,
    /// Entry in `remote_dir` that is never downloaded
    pub sentinel: String,
    /// Bound on every session operation (connect, list, one download)
    pub timeout_secs: u64,
    /// Appended to downloaded file names, e.g. ".lpn"
    pub local_suffix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            port: 21,
            username: "root".to_string(),
            password: "hong".to_string(),
            remote_dir: "/data/productions".to_string(),
            sentinel: ".backup".to_string(),
            timeout_secs: 10,
            local_suffix: String::new(),
        }
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Hypervisor command-line tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    pub program: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            program: "VBoxManage".to_string(),
        }
    }
}

/// Directory layout, relative paths resolved against `work_dir`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Scanned for `.ova` appliance images
    pub image_dir: PathBuf,
    /// Imported images are moved here
    pub archive_dir: PathBuf,
    pub config_share_root: PathBuf,
    /// Per-mixer folders; backups land in `<root>/<mixer>/productions`
    pub user_share_root: PathBuf,
    /// Copied into every model's mxGUI folder of a new config share
    pub global_template: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("."),
            archive_dir: PathBuf::from("mxguiAppliancesArchive"),
            config_share_root: PathBuf::from("configShares"),
            user_share_root: PathBuf::from("mxgui_user_share"),
            global_template: PathBuf::from("mcx_gui_global.tcl"),
        }
    }
}

/// Config fragment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmitterConfig {
    /// Trailing value of every `add_gui_host` line
    pub host_flag: u8,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
