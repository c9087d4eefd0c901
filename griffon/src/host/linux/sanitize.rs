//! Disk sanitization of AHV nodes.
//!
//! The wipe itself is done by an external script; this module only moves the
//! node into holo, stages the script and invokes it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::LinuxHost;
use crate::config::BootConfig;
use crate::constants::sanitize as script;
use crate::detect::detect;
use crate::errors::{ImagingError, ImagingResult};
use crate::transport::{CallOptions, shell_quote};
use crate::types::{BootTarget, OsFamily};

/// Budget for a wipe when the caller sets none. A secure wipe overwrites
/// every disk and runs for hours.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeMode {
    #[default]
    Fast,
    Secure,
}

impl WipeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WipeMode::Fast => "fast",
            WipeMode::Secure => "secure",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SanitizeOptions {
    /// Local copy of the wipe script.
    pub script_path: PathBuf,
    /// Where the script is placed on the node.
    pub remote_path: String,
    pub mode: WipeMode,
    /// Interlock validated by the script itself.
    pub passphrase: String,
    pub consent: String,
    /// Deadline for the script run. Defaults to [`DEFAULT_SCRIPT_TIMEOUT`].
    pub timeout: Option<Duration>,
}

impl SanitizeOptions {
    pub fn new(passphrase: impl Into<String>, consent: impl Into<String>) -> Self {
        Self {
            script_path: PathBuf::from(script::LOCAL_SCRIPT),
            remote_path: script::REMOTE_SCRIPT.to_string(),
            mode: WipeMode::Fast,
            passphrase: passphrase.into(),
            consent: consent.into(),
            timeout: None,
        }
    }

    pub fn with_mode(mut self, mode: WipeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_script(mut self, local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        self.script_path = local.into();
        self.remote_path = remote.into();
        self
    }

    /// Remote command line invoking the script.
    pub fn command(&self) -> String {
        format!(
            "{} -m {} -p {} {} {}",
            shell_quote(&self.remote_path),
            self.mode.as_str(),
            shell_quote(&self.passphrase),
            script::CONSENT_FLAG,
            shell_quote(&self.consent)
        )
    }
}

impl std::fmt::Debug for SanitizeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanitizeOptions")
            .field("script_path", &self.script_path)
            .field("remote_path", &self.remote_path)
            .field("mode", &self.mode)
            .field("passphrase", &"<redacted>")
            .field("consent", &self.consent)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub(super) async fn sanitize_node(
    host: &LinuxHost,
    options: &SanitizeOptions,
    config: &BootConfig,
) -> ImagingResult<()> {
    let remote = host.remote();

    let family = detect(remote).await;
    if family != OsFamily::Ahv {
        return Err(ImagingError::Precondition(format!(
            "this workflow is only supported on AHV for now, detected OS: {}",
            family
        )));
    }
    tracing::info!(address = %remote.address(), "Node is running AHV");

    host.transition_to(BootTarget::Holo.as_str(), config, host.settings().routine_wait)
        .await
        .inspect_err(|e| {
            tracing::error!(address = %remote.address(), error = %e, "Could not reboot into holo partition")
        })?;

    tracing::info!(address = %remote.address(), "Staging sanitization script on host");
    remote
        .copy(
            std::slice::from_ref(&options.script_path),
            &options.remote_path,
            CallOptions::checked(),
        )
        .await?;
    remote
        .run(&format!("chmod +x {}", shell_quote(&options.remote_path)))
        .await?;

    tracing::info!(address = %remote.address(), mode = options.mode.as_str(), "Executing sanitization script on host");
    let call = CallOptions::checked().with_timeout(options.timeout.unwrap_or(DEFAULT_SCRIPT_TIMEOUT));
    remote.call(&options.command(), call).await?;

    tracing::info!(address = %remote.address(), "Sanitization script completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::errors::ConvergenceFailure;
    use crate::host::ImagingHost;
    use crate::testing::{FakeNode, linux_host};
    use std::sync::Arc;

    fn options() -> SanitizeOptions {
        SanitizeOptions::new("s3cret", "yes")
    }

    #[test]
    fn test_script_command_line() {
        assert_eq!(
            options().command(),
            "/sanitize_disks.py -m fast -p s3cret --i-really-know-what-i-am-doing yes"
        );
        assert!(
            options()
                .with_mode(WipeMode::Secure)
                .command()
                .contains(" -m secure ")
        );
        assert!(!format!("{:?}", options()).contains("s3cret"));
    }

    #[tokio::test]
    async fn test_non_ahv_node_is_precondition_failure() {
        let node = Arc::new(FakeNode::booted(OsFamily::CentOs));
        let host = linux_host(&node, OsFamily::CentOs);

        let err = host
            .sanitize_node(&options(), &sample_config())
            .await
            .unwrap_err();

        assert!(matches!(err, ImagingError::Precondition(_)));
        assert!(err.to_string().contains("centos"));
        assert_eq!(node.count_calls("reboot -f"), 0);
        assert_eq!(node.bootloader_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sanitize_moves_to_holo_and_runs_script() {
        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        let host = linux_host(&node, OsFamily::Ahv);

        host.sanitize_node(&options(), &sample_config()).await.unwrap();

        assert_eq!(node.current_family(), OsFamily::CentOs);
        assert!(node.has_file("/sanitize_disks.py"));
        let calls = node.calls();
        let reboot = calls.iter().position(|c| c == "reboot -f").unwrap();
        let chmod = calls
            .iter()
            .position(|c| c == "chmod +x /sanitize_disks.py")
            .unwrap();
        let wipe = calls
            .iter()
            .position(|c| c.starts_with("/sanitize_disks.py -m fast"))
            .unwrap();
        assert!(reboot < chmod && chmod < wipe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_holo_transition_aborts() {
        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        node.boot_into_after_reboot(OsFamily::Ahv);
        let host = linux_host(&node, OsFamily::Ahv);

        let err = host
            .sanitize_node(&options(), &sample_config())
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                ImagingError::Convergence {
                    target: BootTarget::Holo,
                    reason: ConvergenceFailure::WrongTarget { .. }
                }
            ),
            "{err:?}"
        );
        assert!(node.copies().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_after_reboot_keeps_convergence_error() {
        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        node.never_return_after_reboot();
        let host = linux_host(&node, OsFamily::Ahv);

        let err = host
            .sanitize_node(&options(), &sample_config())
            .await
            .unwrap_err();

        assert!(err.is_convergence_failure(), "{err:?}");
        assert!(!matches!(err, ImagingError::Precondition(_)));
        assert_eq!(node.count_calls_starting_with("/sanitize_disks.py"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_budget_defaults_to_long_wipe() {
        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        let host = linux_host(&node, OsFamily::Ahv);

        host.sanitize_node(&options(), &sample_config()).await.unwrap();
        assert_eq!(
            node.budget_of("/sanitize_disks.py -m fast"),
            Some(DEFAULT_SCRIPT_TIMEOUT)
        );
        assert_ne!(
            node.budget_of("chmod +x /sanitize_disks.py"),
            Some(DEFAULT_SCRIPT_TIMEOUT)
        );

        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        let host = linux_host(&node, OsFamily::Ahv);
        let options = SanitizeOptions {
            timeout: Some(Duration::from_secs(600)),
            ..options()
        };
        host.sanitize_node(&options, &sample_config()).await.unwrap();
        assert_eq!(
            node.budget_of("/sanitize_disks.py -m fast"),
            Some(Duration::from_secs(600))
        );
    }
}
