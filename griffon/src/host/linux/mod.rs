//! Linux-family host: AHV, Phoenix and the CentOS-based holo image.
//!
//! The three images share one implementation. Their differences are handled
//! by command and template choice, not by separate types.

mod cmdline;
mod grub;
mod partition;
mod sanitize;
mod staging;
mod transition;

pub use cmdline::{CmdlineTemplates, parse_grubby_args};
pub use grub::{BootConfigBackup, FirmwareMode, parse_menu_entries, select_menu_entry};
pub use partition::{PartitionCache, parse_blkid_uuid, parse_df_device};
pub use sanitize::{DEFAULT_SCRIPT_TIMEOUT, SanitizeOptions, WipeMode};
pub use transition::TransitionPhase;

use async_trait::async_trait;
use std::sync::Arc;

use super::{HostContext, ImagingHost};
use crate::config::BootConfig;
use crate::errors::ImagingResult;
use crate::fetch::Fetcher;
use crate::pipeline::PipelineMetrics;
use crate::settings::{ImagingSettings, WaitBudget};
use crate::transport::Remote;
use crate::types::{OsFamily, RemoteEndpoint};

#[derive(Clone)]
pub struct LinuxHost {
    family: OsFamily,
    remote: Remote,
    ctx: HostContext,
}

impl LinuxHost {
    pub fn new(family: OsFamily, remote: Remote, ctx: HostContext) -> Self {
        Self {
            family,
            remote,
            ctx,
        }
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn settings(&self) -> &ImagingSettings {
        &self.ctx.settings
    }

    fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.ctx.fetcher
    }

    fn templates(&self) -> &CmdlineTemplates {
        &self.ctx.templates
    }
}

impl std::fmt::Debug for LinuxHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxHost")
            .field("family", &self.family)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ImagingHost for LinuxHost {
    fn family(&self) -> OsFamily {
        self.family
    }

    fn endpoint(&self) -> &RemoteEndpoint {
        self.remote.endpoint()
    }

    async fn reboot_to_target_within(
        &self,
        target: &str,
        config: &BootConfig,
        budget: WaitBudget,
    ) -> ImagingResult<()> {
        self.transition_to(target, config, budget).await
    }

    async fn reboot_to_target(&self, target: &str, config: &BootConfig) -> ImagingResult<()> {
        let budget = self.settings().routine_wait;
        self.transition_to(target, config, budget).await
    }

    async fn stage_payload(&self, config: &BootConfig) -> ImagingResult<PipelineMetrics> {
        staging::stage_payload(self, config).await
    }

    async fn sanitize_node(
        &self,
        options: &SanitizeOptions,
        config: &BootConfig,
    ) -> ImagingResult<()> {
        sanitize::sanitize_node(self, options, config).await
    }
}
