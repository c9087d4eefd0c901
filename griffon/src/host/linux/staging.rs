//! Installer payload staging.
//!
//! ```text
//! Stage 1 (sequential): reset local staging dir
//! Stage 2 (parallel):   download kernel, download initrd
//! Stage 3 (sequential): copy payload → chmod target kernel → rename base
//!                       kernel/initrd → back up grub.cfg → drop AHV rootfs
//!                       from fstab
//! ```
//!
//! Remote steps stay strictly sequential. Only the chmod and rename steps roll
//! the grub config back on failure; the backup itself is not checked.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::LinuxHost;
use super::grub::BootConfigBackup;
use super::partition::PartitionCache;
use crate::config::BootConfig;
use crate::constants::{mounts, staging as files};
use crate::errors::{ImagingError, ImagingResult};
use crate::pipeline::{
    BoxedTask, ExecutionPlan, PipelineExecutor, PipelineMetrics, PipelineTask, Stage,
};
use crate::transport::{CallOptions, shell_quote};
use crate::types::StagingManifest;

/// Shared state of one staging run.
pub(super) struct StagingContext {
    host: LinuxHost,
    config: BootConfig,
    staging_dir: PathBuf,
    backup: BootConfigBackup,
    cache: Mutex<PartitionCache>,
}

type StagingCtx = Arc<StagingContext>;

impl StagingContext {
    fn manifest(&self) -> StagingManifest {
        let settings = self.host.settings();
        StagingManifest::new()
            .with_entry(
                self.staging_dir.join(files::KERNEL_FILE),
                vec![settings.boot_path(&settings.kernels.phoenix)],
            )
            .with_entry(
                self.staging_dir.join(files::INITRD_FILE),
                vec![settings.boot_path(&settings.kernels.phoenix_initrd)],
            )
    }

    /// Restore grub.cfg after a failed step, keeping the step's error.
    async fn fail_with_rollback(&self, err: ImagingError) -> ImagingError {
        if let Err(rollback_err) = self.backup.rollback(&self.host).await {
            tracing::warn!(error = %rollback_err, "Error reverting original grub configuration");
        }
        err
    }
}

fn task_start(ctx: &StagingCtx, task: &str) {
    tracing::debug!(address = %ctx.host.remote().address(), task, "Staging step started");
}

fn log_task_error(task: &str, err: &ImagingError) {
    tracing::warn!(task, error = %err, "Staging step failed");
}

struct ResetStagingTask;

#[async_trait]
impl PipelineTask<StagingCtx> for ResetStagingTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        reset_dir(&ctx.staging_dir)
            .await
            .inspect_err(|e| log_task_error(self.name(), e))
    }

    fn name(&self) -> &str {
        "staging_reset"
    }
}

async fn reset_dir(dir: &Path) -> ImagingResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Payload {
    Kernel,
    Initrd,
}

struct DownloadTask(Payload);

#[async_trait]
impl PipelineTask<StagingCtx> for DownloadTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        let phoenix = &ctx.config.phoenix;
        let (url, file) = match self.0 {
            Payload::Kernel => (&phoenix.kernel.url, files::KERNEL_FILE),
            Payload::Initrd => (&phoenix.initrd.url, files::INITRD_FILE),
        };
        ctx.host
            .fetcher()
            .download(url, &ctx.staging_dir.join(file))
            .await
            .inspect_err(|e| log_task_error(self.name(), e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        match self.0 {
            Payload::Kernel => "download_kernel",
            Payload::Initrd => "download_initrd",
        }
    }
}

struct CopyPayloadTask;

#[async_trait]
impl PipelineTask<StagingCtx> for CopyPayloadTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        let attempts = ctx.host.settings().copy_attempts.max(1);
        let remote = ctx.host.remote();

        for (local, destinations) in ctx.manifest().entries() {
            for dest in destinations {
                let sources = [local.clone()];
                let mut attempt = 1;
                loop {
                    let result = remote.copy(&sources, dest, CallOptions::tolerant()).await?;
                    if result.success() {
                        break;
                    }
                    if attempt >= attempts {
                        let err = ImagingError::from_result(
                            remote.address(),
                            &format!("copy {} -> {}", local.display(), dest),
                            &result,
                        );
                        log_task_error(self.name(), &err);
                        return Err(err);
                    }
                    tracing::info!(file = %local.display(), dest = %dest, attempt, "Retrying copy");
                    attempt += 1;
                }
            }
        }
        tracing::info!(address = %remote.address(), "Staging files on host: Successful");
        Ok(())
    }

    fn name(&self) -> &str {
        "payload_copy"
    }
}

struct KernelChmodTask;

#[async_trait]
impl PipelineTask<StagingCtx> for KernelChmodTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        let settings = ctx.host.settings();
        let kernel = settings.boot_path(&settings.kernels.phoenix);
        if let Err(e) = ctx.host.remote().run(&format!("chmod +x {}", shell_quote(&kernel))).await {
            log_task_error(self.name(), &e);
            return Err(ctx.fail_with_rollback(e).await);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "kernel_chmod"
    }
}

struct BaseKernelRenameTask;

#[async_trait]
impl PipelineTask<StagingCtx> for BaseKernelRenameTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        let settings = ctx.host.settings();
        let kernels = &settings.kernels;
        let holo_kernel = shell_quote(&settings.boot_path(&kernels.holo));
        let command = format!(
            "mv {} {} && mv {} {} && chmod +x {}",
            shell_quote(&settings.boot_path(&kernels.base_kernel)),
            holo_kernel,
            shell_quote(&settings.boot_path(&kernels.base_initrd)),
            shell_quote(&settings.boot_path(&kernels.holo_initrd)),
            holo_kernel,
        );
        if let Err(e) = ctx.host.remote().run(&command).await {
            log_task_error(self.name(), &e);
            return Err(ctx.fail_with_rollback(e).await);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "base_kernel_rename"
    }
}

struct BootConfigBackupTask;

#[async_trait]
impl PipelineTask<StagingCtx> for BootConfigBackupTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        ctx.backup.take(&ctx.host).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "boot_config_backup"
    }
}

struct FstabCleanupTask;

#[async_trait]
impl PipelineTask<StagingCtx> for FstabCleanupTask {
    async fn run(self: Box<Self>, ctx: StagingCtx) -> ImagingResult<()> {
        task_start(&ctx, self.name());
        let index = ctx.config.partition_table.nutanix.id;
        let mut cache = ctx.cache.lock().await;
        ctx.host
            .remove_from_fstab(index, &mut cache)
            .await
            .inspect_err(|e| log_task_error(self.name(), e))
    }

    fn name(&self) -> &str {
        "fstab_cleanup"
    }
}

impl LinuxHost {
    /// Drop every mount of partition `index` from `/etc/fstab`, matched by
    /// filesystem UUID.
    pub async fn remove_from_fstab(
        &self,
        index: u32,
        cache: &mut PartitionCache,
    ) -> ImagingResult<()> {
        let partition = cache.partition(self, index).await?;
        tracing::info!(device = %partition.device_path, uuid = %partition.uuid, "Removing partition from fstab");

        let before = self.remote.run_stdout(&format!("cat {}", mounts::FSTAB)).await?;
        tracing::debug!(fstab = %before, "Fstab entries");

        let expr = format!("\\@^UUID={}@d", partition.uuid);
        self.remote
            .run(&format!("sed -i.bak {} {}", shell_quote(&expr), mounts::FSTAB))
            .await
            .map_err(|e| {
                ImagingError::Internal(format!(
                    "could not remove partition {} from {}: {}",
                    partition.device_path,
                    mounts::FSTAB,
                    e
                ))
            })?;

        let after = self.remote.tolerant(&format!("cat {}", mounts::FSTAB)).await;
        if after.success() {
            tracing::info!(fstab = %after.stdout_str().trim(), "Fstab successfully updated");
        }
        Ok(())
    }
}

fn staging_plan() -> ExecutionPlan<StagingCtx> {
    ExecutionPlan::new(vec![
        Stage::sequential(vec![Box::new(ResetStagingTask) as BoxedTask<StagingCtx>]),
        Stage::parallel(vec![
            Box::new(DownloadTask(Payload::Kernel)),
            Box::new(DownloadTask(Payload::Initrd)),
        ]),
        Stage::sequential(vec![
            Box::new(CopyPayloadTask),
            Box::new(KernelChmodTask),
            Box::new(BaseKernelRenameTask),
            Box::new(BootConfigBackupTask),
            Box::new(FstabCleanupTask),
        ]),
    ])
}

pub(super) async fn stage_payload(
    host: &LinuxHost,
    config: &BootConfig,
) -> ImagingResult<PipelineMetrics> {
    // Resolved up front so the rollback branches know which file to restore.
    let grub_cfg = host.grub_config_path().await;
    let ctx = Arc::new(StagingContext {
        host: host.clone(),
        config: config.clone(),
        staging_dir: host.settings().staging_dir.clone(),
        backup: BootConfigBackup::new(grub_cfg),
        cache: Mutex::new(PartitionCache::new()),
    });

    let metrics = PipelineExecutor::execute(staging_plan(), ctx).await?;
    tracing::info!(
        address = %host.remote().address(),
        duration_ms = metrics.total_duration_ms as u64,
        "Stage payload: Successful"
    );
    Ok(metrics)
}
