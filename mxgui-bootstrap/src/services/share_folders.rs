//! Shared-folder trees on the host
//!
//! Two trees are mounted into every appliance:
//! - the user share, one folder per mixer, which also receives backups
//! - the config share, one per appliance image, holding each model's
//!   `config/` folder with the global GUI template and the gui_hosts fragment

use mxgui_common::{Inventory, ModelType};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Mount name of the per-image config share
pub const CONFIG_SHARE_NAME: &str = "mxgui_config_share";

/// Mount name of the user share
pub const USER_SHARE_NAME: &str = "mxgui_user_share";

#[derive(Debug, Error)]
#[error("preparing {path} failed: {source}")]
pub struct ShareError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone)]
pub struct ShareLayout {
    config_share_root: PathBuf,
    user_share_root: PathBuf,
    global_template: PathBuf,
}

impl ShareLayout {
    pub fn new(config_share_root: PathBuf, user_share_root: PathBuf, global_template: PathBuf) -> Self {
        Self {
            config_share_root,
            user_share_root,
            global_template,
        }
    }

    pub fn user_share_root(&self) -> &Path {
        &self.user_share_root
    }

    pub fn user_share_dir(&self, mixer_name: &str) -> PathBuf {
        self.user_share_root.join(mixer_name)
    }

    /// `<config share root>/<vm>/mxgui_config_share`
    pub fn config_share_dir(&self, vm_name: &str) -> PathBuf {
        self.config_share_root.join(vm_name).join(CONFIG_SHARE_NAME)
    }

    /// Folder of one model that receives the global template
    pub fn gui_config_dir(&self, vm_name: &str, model: ModelType) -> PathBuf {
        self.config_share_dir(vm_name)
            .join(model.config_dir())
            .join("config")
            .join("bayserver_config")
            .join("mxGUI")
    }

    /// Create a user-share folder for every inventory mixer
    ///
    /// Failures are logged and skipped; returns how many folders exist
    /// afterwards.
    pub async fn ensure_user_shares(&self, inventory: &Inventory) -> usize {
        let mut ready = 0;
        for mixer in inventory {
            let dir = self.user_share_dir(&mixer.name);
            match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => {
                    debug!("User share folder ready for {}", mixer.name);
                    ready += 1;
                }
                Err(e) => warn!(
                    "Creating user share folder {} for {} failed: {}",
                    dir.display(),
                    mixer.name,
                    e
                ),
            }
        }
        info!("User share folders ready for {} of {} mixers", ready, inventory.len());
        ready
    }

    /// Build the config-share tree for one appliance image
    ///
    /// Copies the global template into each model's mxGUI folder unless a
    /// copy is already there. A missing template only warns.
    pub async fn prepare_config_share(&self, vm_name: &str) -> Result<PathBuf, ShareError> {
        info!("Creating config share folder for {}", vm_name);
        let template_present = tokio::fs::metadata(&self.global_template)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !template_present {
            warn!(
                "Global template {} not found, config shares for {} get no template",
                self.global_template.display(),
                vm_name
            );
        }

        for model in ModelType::ALL {
            let dir = self.gui_config_dir(vm_name, model);
            tokio::fs::create_dir_all(&dir).await.map_err(|source| ShareError {
                path: dir.clone(),
                source,
            })?;

            if !template_present {
                continue;
            }
            let Some(file_name) = self.global_template.file_name() else {
                continue;
            };
            let target = dir.join(file_name);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                continue;
            }
            tokio::fs::copy(&self.global_template, &target)
                .await
                .map_err(|source| ShareError {
                    path: target.clone(),
                    source,
                })?;
            debug!("Copied template to {}", target.display());
        }

        Ok(self.config_share_dir(vm_name))
    }
}
