//! Backup retrieval
//!
//! Mirrors the productions directory of a live mixer into
//! `<user share>/<mixer>/productions/`.
//!
//! Failure granularity:
//! - session (connect, login, listing): the mixer's backup is skipped, one
//!   warning is logged for the mixer
//! - single download: that file is skipped, the rest of the listing goes on
//!
//! Downloads land in a `.part` file that is renamed into place, so nothing
//! half-written ever carries a final name. A download that times out or
//! breaks the connection closes the session; the next file is fetched over
//! a new one.

use mxgui_common::config::TransferConfig;
use mxgui_common::report::{BackupOutcome, FileFailure};
use mxgui_common::Mixer;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::services::transfer::{TransferConnector, TransferError, TransferSession};

/// Local folder under each mixer's user share that receives the backup
pub const PRODUCTIONS_DIR: &str = "productions";

#[derive(Debug, Error)]
enum BackupError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("cannot write {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Transfer(TransferError::Cancelled))
    }
}

pub struct BackupRetriever {
    connector: Arc<dyn TransferConnector>,
    user_share_root: PathBuf,
    remote_dir: String,
    sentinel: String,
    local_suffix: String,
    timeout: Duration,
}

impl BackupRetriever {
    pub fn new(
        connector: Arc<dyn TransferConnector>,
        user_share_root: PathBuf,
        config: &TransferConfig,
    ) -> Self {
        Self {
            connector,
            user_share_root,
            remote_dir: config.remote_dir.clone(),
            sentinel: config.sentinel.clone(),
            local_suffix: config.local_suffix.clone(),
            timeout: config.timeout(),
        }
    }

    /// `<user share>/<mixer>/productions`
    pub fn productions_dir(&self, mixer_name: &str) -> PathBuf {
        self.user_share_root.join(mixer_name).join(PRODUCTIONS_DIR)
    }

    /// Mirror the remote directory of `mixer`
    ///
    /// Never fails: every problem is logged and folded into the outcome.
    pub async fn retrieve(&self, mixer: &Mixer, cancel: &CancellationToken) -> BackupOutcome {
        info!("Backing up {}...", mixer.name);

        let mut session = match self.open(mixer, cancel).await {
            Ok(session) => session,
            Err(TransferError::Cancelled) => {
                info!("Backup of {} cancelled before connecting", mixer.name);
                return BackupOutcome::cancelled(&mixer.name, Vec::new());
            }
            Err(e) => {
                warn!("Backup of {} failed: {}", mixer.name, e);
                return BackupOutcome::session_failed(&mixer.name, e.to_string());
            }
        };

        let outcome = self.mirror(mixer, &mut session, cancel).await;
        session.close().await;
        outcome
    }

    async fn open(
        &self,
        mixer: &Mixer,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn TransferSession>, TransferError> {
        self.bounded(cancel, self.connector.connect(&mixer.primary_address))
            .await
    }

    async fn mirror(
        &self,
        mixer: &Mixer,
        session: &mut Box<dyn TransferSession>,
        cancel: &CancellationToken,
    ) -> BackupOutcome {
        let entries = match self.bounded(cancel, session.list(&self.remote_dir)).await {
            Ok(entries) => entries,
            Err(TransferError::Cancelled) => {
                return BackupOutcome::cancelled(&mixer.name, Vec::new());
            }
            Err(e) => {
                warn!("Backup of {} failed: {}", mixer.name, e);
                return BackupOutcome::session_failed(&mixer.name, e.to_string());
            }
        };

        let target_dir = self.productions_dir(&mixer.name);
        if let Err(source) = tokio::fs::create_dir_all(&target_dir).await {
            let error = BackupError::Local {
                path: target_dir,
                source,
            };
            warn!("Backup of {} failed: {}", mixer.name, error);
            return BackupOutcome::session_failed(&mixer.name, error.to_string());
        }

        let mut downloaded = Vec::new();
        let mut failed_files = Vec::new();
        // Set once the session is gone and cannot be reopened
        let mut lost: Option<String> = None;

        for entry in entries {
            let Some(name) = entry_name(&entry, &self.sentinel) else {
                debug!("Skipping entry {:?} on {}", entry, mixer.name);
                continue;
            };

            if cancel.is_cancelled() {
                info!("Backup of {} cancelled after {} files", mixer.name, downloaded.len());
                return BackupOutcome::cancelled(&mixer.name, downloaded);
            }

            if lost.is_none() && !session.is_open() {
                debug!("Reopening transfer session to {}", mixer.name);
                match self.open(mixer, cancel).await {
                    Ok(fresh) => *session = fresh,
                    Err(TransferError::Cancelled) => {
                        return BackupOutcome::cancelled(&mixer.name, downloaded);
                    }
                    Err(e) => {
                        warn!("Reopening session to {} failed: {}", mixer.name, e);
                        lost = Some(e.to_string());
                    }
                }
            }
            if let Some(reason) = &lost {
                failed_files.push(FileFailure {
                    file: name,
                    error: reason.clone(),
                });
                continue;
            }

            info!("Downloading {} from {}...", name, mixer.name);
            let remote_path = format!("{}/{}", self.remote_dir.trim_end_matches('/'), name);
            let local_path = target_dir.join(format!("{}{}", name, self.local_suffix));

            match self
                .download(session.as_mut(), &remote_path, &local_path, cancel)
                .await
            {
                Ok(()) => downloaded.push(name),
                Err(e) if e.is_cancelled() => {
                    info!("Backup of {} cancelled during {}", mixer.name, name);
                    return BackupOutcome::cancelled(&mixer.name, downloaded);
                }
                Err(e) => {
                    warn!("Download of {} from {} failed: {}", name, mixer.name, e);
                    failed_files.push(FileFailure {
                        file: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            downloaded = downloaded.len(),
            failed = failed_files.len(),
            "Backup of {} finished",
            mixer.name
        );
        BackupOutcome::from_files(&mixer.name, downloaded, failed_files)
    }

    async fn download(
        &self,
        session: &mut dyn TransferSession,
        remote_path: &str,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BackupError> {
        let data = self.bounded(cancel, session.retrieve(remote_path)).await?;

        let partial = partial_path(local_path);
        let written = match tokio::fs::write(&partial, &data).await {
            Ok(()) => tokio::fs::rename(&partial, local_path).await,
            Err(e) => Err(e),
        };

        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BackupError::Local {
                path: local_path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }

    /// Run one session operation under the transfer timeout and the run's
    /// cancellation token
    async fn bounded<T, F>(&self, cancel: &CancellationToken, op: F) -> Result<T, TransferError>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = tokio::time::timeout(self.timeout, op) => {
                result.unwrap_or_else(|_| Err(TransferError::Timeout(self.timeout)))
            }
        }
    }
}

/// Local file name for a listing entry, or `None` if it must be skipped
///
/// Listings may carry full remote paths; only the last component is used.
fn entry_name(entry: &str, sentinel: &str) -> Option<String> {
    let entry = entry.trim_end_matches(['\r', '\n']);
    let name = entry.rsplit('/').next().unwrap_or(entry);

    if name.is_empty() || name == "." || name == ".." || name == sentinel || name.contains('\\') {
        return None;
    }
    Some(name.to_string())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
