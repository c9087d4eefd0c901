//! Workflow entry points.
//!
//! Each driver loads its [`BootConfig`], resolves a host for the node and runs
//! exactly one host operation. Every failure, including malformed config and
//! unsupported nodes, is folded into a [`WorkflowReport`] instead of escaping.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{BootConfig, ConfigSource};
use crate::detect::{HostResolution, detect, resolve_host};
use crate::errors::{ImagingError, ImagingResult};
use crate::fetch::HttpFetcher;
use crate::host::{CmdlineTemplates, HostContext, ImagingHost, SanitizeOptions};
use crate::settings::ImagingSettings;
use crate::transport::{Remote, SessionPool, SshTransport, Transport};
use crate::types::{BootTarget, OsFamily, RemoteEndpoint};

/// Outcome of one workflow call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub success: bool,
    pub message: String,
}

impl WorkflowReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(err: &ImagingError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
        }
    }
}

impl From<ImagingResult<String>> for WorkflowReport {
    fn from(result: ImagingResult<String>) -> Self {
        match result {
            Ok(message) => WorkflowReport::ok(message),
            Err(err) => WorkflowReport::failed(&err),
        }
    }
}

/// Stateless drivers sharing one transport and host context.
#[derive(Clone)]
pub struct Workflows {
    transport: Arc<dyn Transport>,
    ctx: HostContext,
}

impl Workflows {
    pub fn new(transport: Arc<dyn Transport>, ctx: HostContext) -> Self {
        Self { transport, ctx }
    }

    /// SSH transport, HTTP fetcher and templates built from `settings`.
    pub fn from_settings(settings: ImagingSettings) -> ImagingResult<Self> {
        settings.sanitize()?;
        let transport = SshTransport::new(SessionPool::new(settings.session_limit));
        let fetcher = HttpFetcher::new(settings.http_timeout)?;
        let templates = CmdlineTemplates::load(settings.template_dir.as_deref())?;
        let ctx = HostContext::new(Arc::new(fetcher), Arc::new(settings), Arc::new(templates));
        Ok(Self::new(Arc::new(transport), ctx))
    }

    pub fn settings(&self) -> &ImagingSettings {
        &self.ctx.settings
    }

    /// Bind `endpoint` to the transport. Calls without their own deadline use
    /// the configured `command_timeout`.
    fn remote(&self, endpoint: RemoteEndpoint) -> Remote {
        let endpoint = endpoint.with_default_timeout(self.settings().command_timeout);
        Remote::new(endpoint, self.transport.clone())
    }

    async fn host(&self, endpoint: RemoteEndpoint) -> ImagingResult<Box<dyn ImagingHost>> {
        let address = endpoint.address.clone();
        match resolve_host(self.remote(endpoint), self.ctx.clone()).await {
            HostResolution::Supported(host) => Ok(host),
            HostResolution::Unsupported(family) => {
                Err(ImagingError::UnsupportedOs { address, family })
            }
        }
    }

    /// Report the OS family the node is running.
    pub async fn detect(&self, endpoint: RemoteEndpoint) -> WorkflowReport {
        let family = detect(&self.remote(endpoint)).await;
        WorkflowReport {
            success: family != OsFamily::Unknown,
            message: family.to_string(),
        }
    }

    pub async fn reboot_to_ahv(
        &self,
        endpoint: RemoteEndpoint,
        source: &ConfigSource,
        first_boot: bool,
    ) -> WorkflowReport {
        self.reboot_to(endpoint, BootTarget::Ahv, source, first_boot).await
    }

    pub async fn reboot_to_holo(
        &self,
        endpoint: RemoteEndpoint,
        source: &ConfigSource,
        first_boot: bool,
    ) -> WorkflowReport {
        self.reboot_to(endpoint, BootTarget::Holo, source, first_boot).await
    }

    pub async fn reboot_to_phoenix(
        &self,
        endpoint: RemoteEndpoint,
        source: &ConfigSource,
        first_boot: bool,
    ) -> WorkflowReport {
        self.reboot_to(endpoint, BootTarget::Phoenix, source, first_boot).await
    }

    /// Reboot into `target`. `first_boot` selects the long convergence budget
    /// used right after staging.
    pub async fn reboot_to(
        &self,
        endpoint: RemoteEndpoint,
        target: BootTarget,
        source: &ConfigSource,
        first_boot: bool,
    ) -> WorkflowReport {
        let budget = if first_boot {
            self.settings().first_boot_wait
        } else {
            self.settings().routine_wait
        };
        let address = endpoint.address.clone();
        tracing::info!(address = %address, boot_target = %target, first_boot, "Reboot workflow started");

        let result = async {
            let config = source.load()?;
            let host = self.host(endpoint).await?;
            host.reboot_to_target_within(target.as_str(), &config, budget)
                .await?;
            Ok::<_, ImagingError>(format!("node {} booted into {}", address, target))
        }
        .await;
        report("reboot", &address, result)
    }

    /// Stage the installer payload on the node.
    pub async fn stage_payload(
        &self,
        endpoint: RemoteEndpoint,
        source: &ConfigSource,
    ) -> WorkflowReport {
        let address = endpoint.address.clone();
        let result = async {
            let config = source.load()?;
            let host = self.host(endpoint).await?;
            let metrics = host.stage_payload(&config).await?;
            Ok::<_, ImagingError>(format!(
                "payload staged on {} in {} ms",
                address, metrics.total_duration_ms
            ))
        }
        .await;
        report("stage_payload", &address, result)
    }

    /// Wipe an AHV node's disks from its holo image.
    pub async fn sanitize(
        &self,
        endpoint: RemoteEndpoint,
        source: &ConfigSource,
        options: &SanitizeOptions,
    ) -> WorkflowReport {
        let address = endpoint.address.clone();
        let result = async {
            let config: BootConfig = source.load()?;
            let host = self.host(endpoint).await?;
            host.sanitize_node(options, &config).await?;
            Ok::<_, ImagingError>(format!("sanitization completed on {}", address))
        }
        .await;
        report("sanitize", &address, result)
    }
}

fn report(workflow: &str, address: &str, result: ImagingResult<String>) -> WorkflowReport {
    let report = WorkflowReport::from(result);
    if report.success {
        tracing::info!(workflow, address, message = %report.message, "Workflow succeeded");
    } else {
        tracing::error!(workflow, address, message = %report.message, "Workflow failed");
    }
    report
}
