//! Griffon: remote re-imaging control plane.
//!
//! Moves nodes between the holo recovery image, the phoenix installer and the
//! AHV hypervisor over SSH alone: detect what a node runs, stage installer
//! payloads, rewrite its bootloader, reboot it and verify it converged.

pub mod config;
pub mod constants;
pub mod detect;
pub mod errors;
pub mod fetch;
pub mod host;
pub mod logging;
pub mod pipeline;
pub mod settings;
pub mod transport;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BootConfig, ConfigSource, NetworkDescriptor};
pub use detect::{HostResolution, WaitOutcome, detect, resolve_host, wait_for_host};
pub use errors::{ConvergenceFailure, ImagingError, ImagingResult};
pub use host::{HostContext, ImagingHost, LinuxHost, SanitizeOptions, WipeMode};
pub use settings::{ImagingSettings, WaitBudget};
pub use transport::{CallOptions, Remote, SessionPool, SshTransport, Transport};
pub use types::{BootTarget, CommandResult, OsFamily, RemoteEndpoint};
pub use workflow::{WorkflowReport, Workflows};
