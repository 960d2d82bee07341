//! Appliance image discovery and import
//!
//! Each `.ova` image is imported into the hypervisor, gets the config share
//! and the user share mounted, and is then moved to the archive directory so
//! the next run does not pick it up again. An image is archived only after
//! every hypervisor step succeeded.

use mxgui_common::report::ImageStage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::command_runner::{display_command, CommandError, CommandRunner};
use crate::services::share_folders::{CONFIG_SHARE_NAME, USER_SHARE_NAME};

const IMAGE_EXTENSION: &str = "ova";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("moving {from} to {to} failed: {source}")]
    Archive {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Import error tagged with the step it happened in
#[derive(Debug, Error)]
#[error("{stage:?} step failed: {error}")]
pub struct ImportFailure {
    pub stage: ImageStage,
    #[source]
    pub error: ImportError,
}

impl ImportFailure {
    fn at(stage: ImageStage) -> impl FnOnce(CommandError) -> ImportFailure {
        move |e| ImportFailure {
            stage,
            error: ImportError::Command(e),
        }
    }
}

/// Appliance images in `dir`, sorted by file name
///
/// A missing or unreadable directory yields no images.
pub async fn discover_images(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan {} for appliance images: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Error while scanning {}: {}", dir.display(), e);
                break;
            }
        };

        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
        if !is_image {
            continue;
        }
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => images.push(path),
            _ => {}
        }
    }

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!("Found {} appliance images in {}", images.len(), dir.display());
    images
}

/// VM name the hypervisor gives an imported image: its file stem
pub fn vm_name(image: &Path) -> String {
    image
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct ApplianceImporter {
    runner: Arc<dyn CommandRunner>,
    program: String,
    user_share_root: PathBuf,
    archive_dir: PathBuf,
}

impl ApplianceImporter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        user_share_root: PathBuf,
        archive_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            user_share_root,
            archive_dir,
        }
    }

    pub fn archive_path(&self, image: &Path) -> PathBuf {
        match image.file_name() {
            Some(name) => self.archive_dir.join(name),
            None => self.archive_dir.clone(),
        }
    }

    /// Import `image` as `vm_name`, mount both shares, archive the image
    pub async fn import(
        &self,
        image: &Path,
        vm_name: &str,
        config_share: &Path,
    ) -> Result<(), ImportFailure> {
        info!("Importing {} as {}", image.display(), vm_name);
        self.hypervisor(vec![
            "import".to_string(),
            "--vsys".to_string(),
            "0".to_string(),
            "--eula".to_string(),
            "accept".to_string(),
            image.display().to_string(),
        ])
        .await
        .map_err(ImportFailure::at(ImageStage::Import))?;

        info!("Adding shared folders to {}", vm_name);
        self.hypervisor(share_args(vm_name, CONFIG_SHARE_NAME, config_share))
            .await
            .map_err(ImportFailure::at(ImageStage::ConfigMount))?;
        self.hypervisor(share_args(vm_name, USER_SHARE_NAME, &self.user_share_root))
            .await
            .map_err(ImportFailure::at(ImageStage::UserMount))?;

        self.archive(image).await.map_err(|error| ImportFailure {
            stage: ImageStage::Archive,
            error,
        })?;

        info!("Imported {}", vm_name);
        Ok(())
    }

    async fn hypervisor(&self, args: Vec<String>) -> Result<(), CommandError> {
        let output = self.runner.run(&self.program, &args).await?;
        if !output.stderr.trim().is_empty() {
            warn!(
                "{} reported: {}",
                display_command(&self.program, &args),
                output.stderr.trim()
            );
        }
        Ok(())
    }

    async fn archive(&self, image: &Path) -> Result<(), ImportError> {
        let target = self.archive_path(image);
        let error = |source| ImportError::Archive {
            from: image.to_path_buf(),
            to: target.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(error)?;
        tokio::fs::rename(image, &target).await.map_err(error)?;
        info!("Archived {} to {}", image.display(), target.display());
        Ok(())
    }
}

fn share_args(vm_name: &str, share_name: &str, host_path: &Path) -> Vec<String> {
    vec![
        "sharedfolder".to_string(),
        "add".to_string(),
        vm_name.to_string(),
        "--name".to_string(),
        share_name.to_string(),
        "--hostpath".to_string(),
        host_path.display().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command_runner::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(args.to_vec());
            if let Some(needle) = self.fail_on {
                if args.iter().any(|a| a == needle) {
                    return Err(CommandError::Failed {
                        program: program.to_string(),
                        status: Some(1),
                        stderr: format!("{} refused", needle),
                    });
                }
            }
            Ok(CommandOutput::default())
        }
    }

    #[test]
    fn test_vm_name_is_file_stem() {
        assert_eq!(vm_name(Path::new("/images/gui1.ova")), "gui1");
        assert_eq!(vm_name(Path::new("studio.v2.OVA")), "studio.v2");
    }

    #[tokio::test]
    async fn test_discover_sorted_case_insensitive() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["b.ova", "a.OVA", "notes.txt", "c.ova.part"] {
            std::fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(temp_dir.path().join("dir.ova")).unwrap();

        let images = discover_images(temp_dir.path()).await;
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.OVA", "b.ova"]);
    }

    #[tokio::test]
    async fn test_discover_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(discover_images(&temp_dir.path().join("absent")).await.is_empty());
    }

    #[tokio::test]
    async fn test_import_runs_steps_then_archives() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("gui1.ova");
        std::fs::write(&image, b"ova").unwrap();

        let runner = Arc::new(ScriptedRunner::default());
        let importer = ApplianceImporter::new(
            runner.clone(),
            "VBoxManage",
            temp_dir.path().join("users"),
            temp_dir.path().join("archive"),
        );
        importer
            .import(&image, "gui1", &temp_dir.path().join("share"))
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0][..5], ["import", "--vsys", "0", "--eula", "accept"]);
        assert_eq!(calls[1][4], CONFIG_SHARE_NAME);
        assert_eq!(calls[2][4], USER_SHARE_NAME);
        assert!(!image.exists());
        assert!(temp_dir.path().join("archive/gui1.ova").exists());
    }

    #[tokio::test]
    async fn test_failed_mount_keeps_image() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("gui1.ova");
        std::fs::write(&image, b"ova").unwrap();

        let runner = Arc::new(ScriptedRunner {
            fail_on: Some(USER_SHARE_NAME),
            ..Default::default()
        });
        let importer = ApplianceImporter::new(
            runner,
            "VBoxManage",
            temp_dir.path().join("users"),
            temp_dir.path().join("archive"),
        );
        let failure = importer
            .import(&image, "gui1", &temp_dir.path().join("share"))
            .await
            .unwrap_err();

        assert_eq!(failure.stage, ImageStage::UserMount);
        assert!(image.exists());
    }
}
