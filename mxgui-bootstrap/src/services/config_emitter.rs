//! gui_hosts.tcl fragment emission
//!
//! One fragment per model inside an appliance's config share, one
//! `add_gui_host` line per live mixer of that model. The file is rebuilt
//! from the snapshot every time and swapped in with a rename, so repeated
//! runs produce the same file rather than appending to it.

use mxgui_common::report::FragmentSummary;
use mxgui_common::{Mixer, ModelType};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::services::live_set::LiveSnapshot;

pub const FRAGMENT_FILE: &str = "gui_hosts.tcl";

#[derive(Debug, Error)]
#[error("writing {path} failed: {source}")]
pub struct EmitError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct ConfigEmitter {
    host_flag: u8,
}

impl ConfigEmitter {
    pub fn new(host_flag: u8) -> Self {
        Self { host_flag }
    }

    pub fn registration_line(&self, mixer: &Mixer) -> String {
        format!(
            "add_gui_host \"{}\" \"{}\" \"{}\" {}",
            mixer.name, mixer.primary_address, mixer.backup_address, self.host_flag
        )
    }

    /// Fragment text for `model`, in snapshot order
    pub fn render(&self, snapshot: &LiveSnapshot, model: ModelType) -> String {
        snapshot
            .by_model(model)
            .map(|mixer| self.registration_line(mixer) + "\n")
            .collect()
    }

    /// `<config share>/<model dir>/config/gui_hosts.tcl`
    pub fn fragment_path(config_share: &Path, model: ModelType) -> PathBuf {
        config_share
            .join(model.config_dir())
            .join("config")
            .join(FRAGMENT_FILE)
    }

    /// Replace the fragment at `path` with the lines for `model`
    ///
    /// Returns the number of lines written.
    pub async fn emit(
        &self,
        snapshot: &LiveSnapshot,
        model: ModelType,
        path: &Path,
    ) -> Result<usize, EmitError> {
        let content = self.render(snapshot, model);
        let lines = content.lines().count();

        let error = |source| EmitError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(error)?;
        }

        let staging = path.with_extension("tcl.tmp");
        if let Err(source) = tokio::fs::write(&staging, content).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error(source));
        }
        tokio::fs::rename(&staging, path).await.map_err(error)?;

        Ok(lines)
    }

    /// Emit the fragment of every model into `config_share`
    pub async fn emit_all(
        &self,
        snapshot: &LiveSnapshot,
        config_share: &Path,
    ) -> Result<Vec<FragmentSummary>, EmitError> {
        let mut summaries = Vec::with_capacity(ModelType::ALL.len());
        for model in ModelType::ALL {
            let path = Self::fragment_path(config_share, model);
            let lines = self.emit(snapshot, model, &path).await?;
            info!("Bootstrapping {} {} with {} hosts", model.config_dir(), FRAGMENT_FILE, lines);
            summaries.push(FragmentSummary { model, path, lines });
        }
        Ok(summaries)
    }
}
