//! Service modules for the bootstrap run
//!
//! Probe phase: prober, live_set, transfer, backup.
//! Provisioning phase: share_folders, config_emitter, command_runner,
//! appliance_importer.

pub mod appliance_importer;
pub mod backup;
pub mod command_runner;
pub mod config_emitter;
pub mod live_set;
pub mod prober;
pub mod share_folders;
pub mod transfer;

pub use appliance_importer::{discover_images, vm_name, ApplianceImporter, ImportError, ImportFailure};
pub use backup::BackupRetriever;
pub use command_runner::{CommandError, CommandOutput, CommandRunner, ProcessRunner};
pub use config_emitter::{ConfigEmitter, EmitError};
pub use live_set::{LiveSetAggregator, LiveSnapshot};
pub use prober::{LivenessProber, ProbeOutcome};
pub use share_folders::{ShareError, ShareLayout};
pub use transfer::{Credentials, FtpConnector, TransferConnector, TransferError, TransferSession};
