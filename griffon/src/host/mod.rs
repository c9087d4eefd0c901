//! Hosts: one implementation per OS family behind [`ImagingHost`].

pub mod linux;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::BootConfig;
use crate::errors::ImagingResult;
use crate::fetch::Fetcher;
use crate::pipeline::PipelineMetrics;
use crate::settings::{ImagingSettings, WaitBudget};
use crate::types::{OsFamily, RemoteEndpoint};

pub use linux::{CmdlineTemplates, LinuxHost, SanitizeOptions, WipeMode};

/// Collaborators every host needs besides its remote.
#[derive(Clone)]
pub struct HostContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub settings: Arc<ImagingSettings>,
    pub templates: Arc<CmdlineTemplates>,
}

impl HostContext {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        settings: Arc<ImagingSettings>,
        templates: Arc<CmdlineTemplates>,
    ) -> Self {
        Self {
            fetcher,
            settings,
            templates,
        }
    }
}

/// A node the imaging workflows can drive.
///
/// A host is bound to one endpoint for its whole life and is discarded after
/// the workflow call that produced it.
#[async_trait]
pub trait ImagingHost: Send + Sync {
    /// Family detected when this host was resolved.
    fn family(&self) -> OsFamily;

    fn endpoint(&self) -> &RemoteEndpoint;

    /// Reboot into `target` and wait for convergence with the given budget.
    ///
    /// `target` is validated before anything touches the node.
    async fn reboot_to_target_within(
        &self,
        target: &str,
        config: &BootConfig,
        budget: WaitBudget,
    ) -> ImagingResult<()>;

    /// Reboot into `target` using the routine wait budget.
    async fn reboot_to_target(&self, target: &str, config: &BootConfig) -> ImagingResult<()>;

    /// Place the installer payload on the node and prepare its boot files.
    async fn stage_payload(&self, config: &BootConfig) -> ImagingResult<PipelineMetrics>;

    /// Move an AHV node to holo and run the disk-wipe script there.
    async fn sanitize_node(
        &self,
        options: &SanitizeOptions,
        config: &BootConfig,
    ) -> ImagingResult<()>;
}
