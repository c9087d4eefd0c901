//! Error types shared by every imaging component.

use crate::types::{BootTarget, CommandResult, OsFamily};
use std::time::Duration;
use thiserror::Error;

pub type ImagingResult<T> = Result<T, ImagingError>;

/// Why a rebooted node did not converge to the requested target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceFailure {
    /// The node never answered a reachability probe within the wait budget.
    Unreachable { cycles: u32, interval: Duration },
    /// The node came back, but fresh detection reported another OS family.
    WrongTarget { booted: OsFamily },
}

impl std::fmt::Display for ConvergenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceFailure::Unreachable { cycles, interval } => write!(
                f,
                "node did not become reachable after {} checks every {}s",
                cycles,
                interval.as_secs()
            ),
            ConvergenceFailure::WrongTarget { booted } => write!(f, "node booted into {}", booted),
        }
    }
}

#[derive(Error, Debug)]
pub enum ImagingError {
    /// Connection, authentication, or deadline failure before a remote exit status was known.
    #[error("transport failure on {address} running '{command}': {message}")]
    Transport {
        address: String,
        command: String,
        message: String,
    },

    /// Remote command finished with a non-zero exit status.
    #[error("command '{command}' returned error code {exit_code}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("OS type '{family}' on {address} is not supported for this workflow")]
    UnsupportedOs { address: String, family: OsFamily },

    #[error("invalid target os {0} specified")]
    InvalidTarget(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("unable to locate '{menu_key}' menuentry for {target} in {config_path}")]
    MenuEntryNotFound {
        target: BootTarget,
        menu_key: String,
        config_path: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("node did not converge to {target}: {reason}")]
    Convergence {
        target: BootTarget,
        reason: ConvergenceFailure,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("exception while rebooting host into target {target}: '{source}'")]
    Transition {
        target: BootTarget,
        #[source]
        source: Box<ImagingError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ImagingError {
    /// Build the error for a failed remote call.
    ///
    /// Exit code -1 means the transport never produced an exit status.
    pub fn from_result(address: &str, command: &str, result: &CommandResult) -> Self {
        if result.exit_code == CommandResult::TRANSPORT_FAILURE {
            ImagingError::Transport {
                address: address.to_string(),
                command: command.to_string(),
                message: result.stderr_lossy(),
            }
        } else {
            ImagingError::Command {
                command: command.to_string(),
                exit_code: result.exit_code,
                stdout: result.stdout_lossy(),
                stderr: result.stderr_lossy(),
            }
        }
    }

    /// Whether this is an outcome the boot orchestrator reports as-is.
    ///
    /// Anything else escaping a transition is wrapped in `Transition`.
    pub fn is_transition_outcome(&self) -> bool {
        matches!(
            self,
            ImagingError::InvalidTarget(_)
                | ImagingError::MenuEntryNotFound { .. }
                | ImagingError::Convergence { .. }
                | ImagingError::Transition { .. }
        )
    }

    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, ImagingError::Convergence { .. })
    }
}
