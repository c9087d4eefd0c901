//! OS detection and host resolution.
//!
//! Every probe here is silent and non-throwing: a failed probe is folded into
//! "not this OS" rather than reported.

use crate::constants::markers;
use crate::host::{HostContext, ImagingHost, LinuxHost};
use crate::settings::WaitBudget;
use crate::transport::Remote;
use crate::types::OsFamily;

/// Classify the OS running on the node.
///
/// The more specific Linux markers are checked before the release file, since
/// every Linux-family image would match the release check.
pub async fn detect(remote: &Remote) -> OsFamily {
    let uname = remote.probe("uname -a").await;
    if !uname.success() {
        tracing::debug!(address = %remote.address(), "Kernel probe failed");
        return OsFamily::Unknown;
    }

    let kernel = uname.stdout_str().to_lowercase();
    if kernel.contains(markers::ESX_KERNEL) {
        return OsFamily::Esx;
    }
    if !kernel.contains(markers::LINUX_KERNEL) {
        return OsFamily::Unknown;
    }

    if file_exists(remote, markers::AHV_RELEASE).await {
        return OsFamily::Ahv;
    }
    if file_exists(remote, markers::PHOENIX_LAYOUT_FINDER).await {
        return OsFamily::Phoenix;
    }

    let release = remote
        .probe(&format!("cat {}", markers::CENTOS_RELEASE))
        .await;
    if release.success() {
        let text = release.stdout_str();
        let text = text.trim();
        if text.contains(markers::CENTOS_NAME) && text.contains(markers::CENTOS_VERSION) {
            return OsFamily::CentOs;
        }
    }

    tracing::info!(
        address = %remote.address(),
        stdout = %uname.stdout_str().trim(),
        "Remote host looks like Linux but the flavor is unknown"
    );
    OsFamily::Unknown
}

async fn file_exists(remote: &Remote, path: &str) -> bool {
    remote.succeeds(&format!("test -f {}", path)).await
}

/// Whether the node accepts a session and runs a trivial command.
pub async fn is_reachable(remote: &Remote) -> bool {
    remote.succeeds("true").await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Node answered; carries the freshly detected family.
    Reached(OsFamily),
    Unreachable,
}

/// Poll until the node is reachable, then detect its OS.
///
/// Each cycle probes once and then sleeps one interval, so a node that never
/// comes back costs exactly `budget.cycles` probes over `budget.total()`.
pub async fn wait_for_host(remote: &Remote, budget: WaitBudget) -> WaitOutcome {
    for cycle in 0..budget.cycles {
        if is_reachable(remote).await {
            tracing::info!(address = %remote.address(), cycle, "Node is up, detecting OS");
            return WaitOutcome::Reached(detect(remote).await);
        }
        tracing::info!(
            address = %remote.address(),
            "[{}/{}] Waiting for node to boot up",
            cycle + 1,
            budget.cycles
        );
        tokio::time::sleep(budget.interval).await;
    }
    WaitOutcome::Unreachable
}

pub enum HostResolution {
    Supported(Box<dyn ImagingHost>),
    /// Detection succeeded but no host handles this family.
    Unsupported(OsFamily),
}

impl std::fmt::Debug for HostResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostResolution::Supported(host) => f
                .debug_tuple("Supported")
                .field(&host.family())
                .finish(),
            HostResolution::Unsupported(family) => {
                f.debug_tuple("Unsupported").field(family).finish()
            }
        }
    }
}

/// Host implementation for a detected family.
pub fn host_for(family: OsFamily, remote: Remote, ctx: HostContext) -> Option<Box<dyn ImagingHost>> {
    match family {
        OsFamily::Ahv | OsFamily::Phoenix | OsFamily::CentOs => {
            Some(Box::new(LinuxHost::new(family, remote, ctx)))
        }
        OsFamily::Esx | OsFamily::Unknown => None,
    }
}

/// Detect the node's OS and build the matching host.
pub async fn resolve_host(remote: Remote, ctx: HostContext) -> HostResolution {
    let family = detect(&remote).await;
    tracing::info!(address = %remote.address(), family = %family, "Detected remote os type");

    match host_for(family, remote, ctx) {
        Some(host) => HostResolution::Supported(host),
        None => {
            tracing::warn!(
                family = %family,
                supported = "ahv, phoenix, centos",
                "OS type is not supported for this workflow"
            );
            HostResolution::Unsupported(family)
        }
    }
}
