//! Boot target transitions.
//!
//! ```text
//! Detecting ──► Transitioning ──► Verifying ──► Converged(target)
//!     │               │               │
//!     └───────────────┴───────────────┴──► failure (node state unchanged
//!                                          or wrong/unreachable target)
//! ```
//!
//! Detecting resolves the grub config the firmware reads and regenerates it so
//! the menu reflects the kernels on disk. Transitioning selects the target's
//! entry, makes it the default, rewrites the kernel command line and reboots.
//! Verifying polls until the node answers and a fresh detection confirms it.

use super::LinuxHost;
use super::partition::PartitionCache;
use crate::config::BootConfig;
use crate::detect::{WaitOutcome, wait_for_host};
use crate::errors::{ConvergenceFailure, ImagingError, ImagingResult};
use crate::settings::WaitBudget;
use crate::transport::CallOptions;
use crate::types::BootTarget;
use std::time::Duration;

/// Deadline for the reboot command; the session dies with the node anyway.
const REBOOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Detecting,
    Transitioning,
    Verifying,
    Converged(BootTarget),
}

impl std::fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionPhase::Detecting => f.write_str("detecting"),
            TransitionPhase::Transitioning => f.write_str("transitioning"),
            TransitionPhase::Verifying => f.write_str("verifying"),
            TransitionPhase::Converged(target) => write!(f, "converged({})", target),
        }
    }
}

impl LinuxHost {
    /// Drive the node to `target` and confirm it converged.
    ///
    /// An unknown target fails before any remote call. Failures that are not
    /// themselves transition outcomes are wrapped in `Transition`.
    pub(super) async fn transition_to(
        &self,
        target: &str,
        config: &BootConfig,
        budget: WaitBudget,
    ) -> ImagingResult<()> {
        let target = BootTarget::parse(target).inspect_err(|e| tracing::warn!("{}", e))?;

        self.run_transition(target, config, budget)
            .await
            .map_err(|e| {
                let err = if e.is_transition_outcome() {
                    e
                } else {
                    ImagingError::Transition {
                        target,
                        source: Box::new(e),
                    }
                };
                tracing::warn!(address = %self.remote.address(), boot_target = %target, error = %err, "Transition failed");
                err
            })
    }

    async fn run_transition(
        &self,
        target: BootTarget,
        config: &BootConfig,
        budget: WaitBudget,
    ) -> ImagingResult<()> {
        let address = self.remote.address();
        let mut phase = TransitionPhase::Detecting;
        tracing::info!(address, current = %self.family, boot_target = %target, %phase, "Starting transition");

        let grub_cfg = self.grub_config_path().await;
        self.regenerate_config(&grub_cfg).await?;
        let entry = self.find_menu_entry(&grub_cfg, target).await?;

        phase = TransitionPhase::Transitioning;
        tracing::info!(address, entry = %entry, %phase, "Marking {} as default in grub config", target);
        self.set_default_entry(&entry).await?;
        self.regenerate_config(&grub_cfg).await?;

        let mut cache = PartitionCache::new();
        let cmdline = self.kernel_cmdline(target, config, &mut cache).await?;
        self.set_kernel_cmdline(&self.settings().kernel_path(target), &cmdline)
            .await?;
        self.reboot().await;

        phase = TransitionPhase::Verifying;
        tracing::info!(address, %phase, cycles = budget.cycles, "Waiting for node to reboot into {}", target);
        let booted = match wait_for_host(&self.remote, budget).await {
            WaitOutcome::Reached(family) => family,
            WaitOutcome::Unreachable => {
                return Err(ImagingError::Convergence {
                    target,
                    reason: ConvergenceFailure::Unreachable {
                        cycles: budget.cycles,
                        interval: budget.interval,
                    },
                });
            }
        };

        if booted != target.expected_family() {
            return Err(ImagingError::Convergence {
                target,
                reason: ConvergenceFailure::WrongTarget { booted },
            });
        }

        phase = TransitionPhase::Converged(target);
        tracing::info!(address, %phase, "Node successfully booted into {}", target);
        Ok(())
    }

    /// Force an immediate reboot.
    ///
    /// The session usually dies with the node, so the outcome is only logged.
    pub async fn reboot(&self) {
        tracing::info!(address = %self.remote.address(), "Rebooting the host");
        let result = self
            .remote
            .call("reboot -f", CallOptions::probe().with_timeout(REBOOT_TIMEOUT))
            .await;
        if let Ok(result) = result {
            tracing::debug!(
                exit_code = result.exit_code,
                stderr = %result.stderr_lossy().trim(),
                "Reboot command returned"
            );
        }
    }
}
