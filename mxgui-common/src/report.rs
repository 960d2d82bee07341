//! Run report
//!
//! Every run ends with a report of which mixers were live, which backups
//! succeeded and which images were imported. Recoverable failures are
//! absorbed here instead of terminating the process.

use crate::inventory::ModelType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Mixer that did not answer its liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub mixer: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Every listed entry was downloaded
    Completed,
    /// Session worked but at least one file failed
    Partial,
    /// Session could not be established or listed
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Result of one mixer's backup retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub mixer: String,
    pub status: BackupStatus,
    pub downloaded: Vec<String>,
    pub failed_files: Vec<FileFailure>,
    /// Session-level error, set when `status` is `Failed`
    pub error: Option<String>,
}

impl BackupOutcome {
    pub fn from_files(
        mixer: impl Into<String>,
        downloaded: Vec<String>,
        failed_files: Vec<FileFailure>,
    ) -> Self {
        let status = if failed_files.is_empty() {
            BackupStatus::Completed
        } else {
            BackupStatus::Partial
        };
        Self {
            mixer: mixer.into(),
            status,
            downloaded,
            failed_files,
            error: None,
        }
    }

    pub fn session_failed(mixer: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            mixer: mixer.into(),
            status: BackupStatus::Failed,
            downloaded: Vec::new(),
            failed_files: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn cancelled(mixer: impl Into<String>, downloaded: Vec<String>) -> Self {
        Self {
            mixer: mixer.into(),
            status: BackupStatus::Cancelled,
            downloaded,
            failed_files: Vec::new(),
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == BackupStatus::Completed
    }
}

/// Provisioning step an image failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStage {
    ConfigShare,
    Emit,
    Import,
    ConfigMount,
    UserMount,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Imported,
    Failed { stage: ImageStage, error: String },
    /// Not attempted because the run was cancelled
    Skipped,
}

/// Config fragment written for one model of one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSummary {
    pub model: ModelType,
    pub path: PathBuf,
    pub lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOutcome {
    /// Image file name
    pub image: String,
    pub vm_name: String,
    pub status: ImageStatus,
    pub fragments: Vec<FragmentSummary>,
}

impl ImageOutcome {
    pub fn imported(&self) -> bool {
        self.status == ImageStatus::Imported
    }
}

/// Summary of a whole bootstrap run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub inventory_size: usize,
    /// Live mixer names in inventory order
    pub live: Vec<String>,
    pub unreachable: Vec<ProbeFailure>,
    pub backups: Vec<BackupOutcome>,
    pub images: Vec<ImageOutcome>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(inventory_size: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            inventory_size,
            live: Vec::new(),
            unreachable: Vec::new(),
            backups: Vec::new(),
            images: Vec::new(),
            cancelled: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn backup_for(&self, mixer: &str) -> Option<&BackupOutcome> {
        self.backups.iter().find(|b| b.mixer == mixer)
    }

    pub fn backups_succeeded(&self) -> usize {
        self.backups.iter().filter(|b| b.succeeded()).count()
    }

    pub fn images_imported(&self) -> usize {
        self.images.iter().filter(|i| i.imported()).count()
    }

    /// Human-readable summary, one line per entry
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Live mixers: {} of {}{}",
            self.live.len(),
            self.inventory_size,
            if self.live.is_empty() {
                String::new()
            } else {
                format!(" ({})", self.live.join(", "))
            }
        )];

        for failure in &self.unreachable {
            lines.push(format!("  unreachable: {} ({})", failure.mixer, failure.reason));
        }

        lines.push(format!(
            "Backups succeeded: {} of {}",
            self.backups_succeeded(),
            self.backups.len()
        ));
        for backup in &self.backups {
            let detail = match backup.status {
                BackupStatus::Completed => format!("{} files", backup.downloaded.len()),
                BackupStatus::Partial => format!(
                    "{} files, {} failed",
                    backup.downloaded.len(),
                    backup.failed_files.len()
                ),
                BackupStatus::Failed => backup.error.clone().unwrap_or_default(),
                BackupStatus::Cancelled => "cancelled".to_string(),
            };
            lines.push(format!("  {}: {:?} ({})", backup.mixer, backup.status, detail));
        }

        lines.push(format!(
            "Images imported: {} of {}",
            self.images_imported(),
            self.images.len()
        ));
        for image in &self.images {
            let detail = match &image.status {
                ImageStatus::Imported => "imported".to_string(),
                ImageStatus::Failed { stage, error } => format!("failed at {:?}: {}", stage, error),
                ImageStatus::Skipped => "skipped".to_string(),
            };
            lines.push(format!("  {}: {}", image.image, detail));
        }

        if self.cancelled {
            lines.push("Run was cancelled before completion".to_string());
        }
        lines
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
