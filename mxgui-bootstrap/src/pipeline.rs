//! Bootstrap run
//!
//! # Phases
//! 1. User share folders for every inventory mixer
//! 2. Probe and backup: one task per mixer, bounded by a semaphore. A mixer
//!    that answers is recorded as live and, if this task admitted it, backed
//!    up within the same task.
//! 3. Barrier: the task set drains, the live set is frozen into a snapshot
//! 4. Provisioning, per discovered image: config share, gui_hosts fragments,
//!    import, mounts, archive
//!
//! Only startup conditions end the run with an error. Everything else is
//! logged and recorded in the [`RunReport`].

use mxgui_common::report::{
    BackupOutcome, ImageOutcome, ImageStage, ImageStatus, ProbeFailure, RunReport,
};
use mxgui_common::Mixer;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BootstrapError, BootstrapResult};
use crate::services::{
    discover_images, vm_name, ApplianceImporter, BackupRetriever, ConfigEmitter,
    LiveSetAggregator, LiveSnapshot, LivenessProber, ProbeOutcome, ShareLayout,
};
use crate::RunContext;

/// What one mixer task reports back across the barrier
#[derive(Debug)]
struct MixerResult {
    index: usize,
    name: String,
    probe: ProbeOutcome,
    backup: Option<BackupOutcome>,
}

pub struct BootstrapPipeline {
    ctx: RunContext,
}

impl BootstrapPipeline {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Execute one full run
    pub async fn run(&self) -> BootstrapResult<RunReport> {
        let config = &self.ctx.config;
        config.validate()?;
        check_work_dir(&config.work_dir).await?;

        let mut report = RunReport::new(self.ctx.inventory.len());
        info!(
            run_id = %report.run_id,
            "Bootstrapping {} mixers from {}",
            self.ctx.inventory.len(),
            config.work_dir.display()
        );

        let layout = ShareLayout::new(
            config.resolve(&config.paths.config_share_root),
            config.resolve(&config.paths.user_share_root),
            config.resolve(&config.paths.global_template),
        );
        layout.ensure_user_shares(&self.ctx.inventory).await;

        let (snapshot, results) = self.probe_and_backup(&layout).await?;
        self.record_results(&mut report, &snapshot, results);
        info!("Live mixers: {}", snapshot.names().join(", "));

        let images = discover_images(&config.resolve(&config.paths.image_dir)).await;
        let emitter = ConfigEmitter::new(config.emitter.host_flag);
        let importer = ApplianceImporter::new(
            Arc::clone(&self.ctx.runner),
            config.hypervisor.program.clone(),
            layout.user_share_root().to_path_buf(),
            config.resolve(&config.paths.archive_dir),
        );

        for image in images {
            let outcome = if self.ctx.cancel.is_cancelled() {
                skipped(&image)
            } else {
                provision_image(&image, &snapshot, &layout, &emitter, &importer).await
            };
            report.images.push(outcome);
        }

        if self.ctx.cancel.is_cancelled() {
            warn!("Run cancelled, provisioning skipped");
            report.cancelled = true;
        }

        report.finish();
        for line in report.summary_lines() {
            info!("{}", line);
        }
        Ok(report)
    }

    /// Probe every mixer and back up the live ones, then freeze the live set
    async fn probe_and_backup(
        &self,
        layout: &ShareLayout,
    ) -> BootstrapResult<(LiveSnapshot, Vec<MixerResult>)> {
        let config = &self.ctx.config;
        let prober = Arc::new(LivenessProber::new(config.probe.port, config.probe.timeout()));
        let retriever = Arc::new(BackupRetriever::new(
            Arc::clone(&self.ctx.connector),
            layout.user_share_root().to_path_buf(),
            &config.transfer,
        ));
        let aggregator = Arc::new(LiveSetAggregator::new());
        let semaphore = Arc::new(Semaphore::new(
            config.probe.max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
        ));

        info!(
            "Testing connectivity to {} mixers ({} at a time)",
            self.ctx.inventory.len(),
            config.probe.max_concurrency
        );

        let mut tasks = JoinSet::new();
        for (index, mixer) in self.ctx.inventory.iter().enumerate() {
            tasks.spawn(mixer_task(
                index,
                mixer.clone(),
                Arc::clone(&prober),
                Arc::clone(&retriever),
                Arc::clone(&aggregator),
                Arc::clone(&semaphore),
                self.ctx.cancel.clone(),
            ));
        }

        let mut results = Vec::with_capacity(self.ctx.inventory.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Mixer task failed: {}", e),
            }
        }

        let aggregator = Arc::try_unwrap(aggregator).map_err(|_| {
            BootstrapError::Internal("live set still shared after all mixer tasks finished".to_string())
        })?;
        let snapshot = aggregator.into_snapshot(&self.ctx.inventory);

        results.sort_by_key(|r| r.index);
        Ok((snapshot, results))
    }

    fn record_results(&self, report: &mut RunReport, snapshot: &LiveSnapshot, results: Vec<MixerResult>) {
        report.live = snapshot.names();

        let mut next = 0;
        for result in results {
            // Tasks that panicked left a gap in the indices
            for missing in &self.ctx.inventory.mixers()[next..result.index] {
                report.unreachable.push(ProbeFailure {
                    mixer: missing.name.clone(),
                    reason: "probe task failed".to_string(),
                });
            }
            next = result.index + 1;

            match result.probe {
                ProbeOutcome::Reachable => {}
                ProbeOutcome::Unreachable(reason) => report.unreachable.push(ProbeFailure {
                    mixer: result.name,
                    reason,
                }),
                ProbeOutcome::Cancelled => report.unreachable.push(ProbeFailure {
                    mixer: result.name,
                    reason: "cancelled".to_string(),
                }),
            }
            if let Some(backup) = result.backup {
                report.backups.push(backup);
            }
        }

        for missing in &self.ctx.inventory.mixers()[next..] {
            report.unreachable.push(ProbeFailure {
                mixer: missing.name.clone(),
                reason: "probe task failed".to_string(),
            });
        }
    }
}

async fn mixer_task(
    index: usize,
    mixer: Mixer,
    prober: Arc<LivenessProber>,
    retriever: Arc<BackupRetriever>,
    aggregator: Arc<LiveSetAggregator>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> MixerResult {
    let cancelled = |mixer: Mixer| MixerResult {
        index,
        name: mixer.name,
        probe: ProbeOutcome::Cancelled,
        backup: None,
    };

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(mixer),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return cancelled(mixer),
        },
    };

    let probe = prober.probe(&mixer, &cancel).await;
    let backup = match &probe {
        ProbeOutcome::Reachable => {
            if aggregator.record_live(&mixer) {
                info!("Recorded {} as live", mixer.name);
                Some(retriever.retrieve(&mixer, &cancel).await)
            } else {
                debug!("{} already recorded as live, skipping duplicate entry", mixer.name);
                None
            }
        }
        ProbeOutcome::Unreachable(reason) => {
            warn!("{} is unreachable: {}", mixer.name, reason);
            None
        }
        ProbeOutcome::Cancelled => {
            debug!("Probe of {} cancelled", mixer.name);
            None
        }
    };

    MixerResult {
        index,
        name: mixer.name,
        probe,
        backup,
    }
}

async fn provision_image(
    image: &Path,
    snapshot: &LiveSnapshot,
    layout: &ShareLayout,
    emitter: &ConfigEmitter,
    importer: &ApplianceImporter,
) -> ImageOutcome {
    let vm = vm_name(image);
    let mut outcome = ImageOutcome {
        image: image_label(image),
        vm_name: vm.clone(),
        status: ImageStatus::Imported,
        fragments: Vec::new(),
    };

    let failed = |mut outcome: ImageOutcome, stage: ImageStage, error: String| {
        warn!("Provisioning {} failed at {:?}: {}", outcome.image, stage, error);
        outcome.status = ImageStatus::Failed { stage, error };
        outcome
    };

    let share = match layout.prepare_config_share(&vm).await {
        Ok(share) => share,
        Err(e) => return failed(outcome, ImageStage::ConfigShare, e.to_string()),
    };

    match emitter.emit_all(snapshot, &share).await {
        Ok(fragments) => outcome.fragments = fragments,
        Err(e) => return failed(outcome, ImageStage::Emit, e.to_string()),
    }

    if let Err(failure) = importer.import(image, &vm, &share).await {
        return failed(outcome, failure.stage, failure.error.to_string());
    }
    outcome
}

fn skipped(image: &Path) -> ImageOutcome {
    ImageOutcome {
        image: image_label(image),
        vm_name: vm_name(image),
        status: ImageStatus::Skipped,
        fragments: Vec::new(),
    }
}

fn image_label(image: &Path) -> String {
    image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string())
}

async fn check_work_dir(path: &Path) -> BootstrapResult<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|source| BootstrapError::WorkDir {
            path: path.to_path_buf(),
            source,
        })?;
    if !metadata.is_dir() {
        return Err(BootstrapError::WorkDir {
            path: path.to_path_buf(),
            source: std::io::Error::other("not a directory"),
        });
    }
    Ok(())
}
