//! Remote command execution and file transfer.
//!
//! A [`Transport`] runs one command or one copy against an endpoint and always
//! hands back a raw [`CommandResult`]; it never decides whether a non-zero exit
//! is an error. That policy lives in [`Remote`], which binds an endpoint to a
//! transport and applies [`CallOptions`] per call:
//!
//! - `checked()`: a failure becomes an [`ImagingError`] and is logged.
//! - `tolerant()`: the result is returned for inspection, failures are logged.
//! - `probe()`: the result is returned and nothing is logged. Used for
//!   questions like "does this file exist" where exit 1 is an answer.

mod pool;
mod scp;
mod ssh;

pub use pool::{SessionError, SessionPool};
pub use ssh::SshTransport;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ImagingError, ImagingResult};
use crate::types::{CommandResult, RemoteEndpoint};

/// Failure policy and deadline of one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Per-call deadline. Falls back to the endpoint's default timeout.
    pub timeout: Option<Duration>,
    pub throw_on_error: bool,
    pub log_on_error: bool,
}

impl CallOptions {
    pub const fn checked() -> Self {
        Self {
            timeout: None,
            throw_on_error: true,
            log_on_error: true,
        }
    }

    pub const fn tolerant() -> Self {
        Self {
            timeout: None,
            throw_on_error: false,
            log_on_error: true,
        }
    }

    pub const fn probe() -> Self {
        Self {
            timeout: None,
            throw_on_error: false,
            log_on_error: false,
        }
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deadline budget for a call against `endpoint`.
    pub fn budget(&self, endpoint: &RemoteEndpoint) -> Duration {
        self.timeout.unwrap_or(endpoint.default_timeout)
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self::checked()
    }
}

/// Absolute point in time after which a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: tokio::time::Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: tokio::time::Instant::now() + budget,
            budget,
        }
    }

    pub fn instant(&self) -> tokio::time::Instant {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(tokio::time::Instant::now())
    }
}

/// Executes commands and copies files on remote nodes.
///
/// Implementations report transport-level failures (connect, auth, deadline)
/// as a result with exit code [`CommandResult::TRANSPORT_FAILURE`] and the
/// reason in stderr. Retries are left to callers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
        options: &CallOptions,
    ) -> CommandResult;

    /// Copy `local_paths` to `remote_target`. With several sources the target
    /// must be a directory.
    async fn copy(
        &self,
        endpoint: &RemoteEndpoint,
        local_paths: &[PathBuf],
        remote_target: &str,
        options: &CallOptions,
    ) -> CommandResult;
}

/// An endpoint bound to a transport, applying the per-call failure policy.
#[derive(Clone)]
pub struct Remote {
    endpoint: RemoteEndpoint,
    transport: Arc<dyn Transport>,
}

impl Remote {
    pub fn new(endpoint: RemoteEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `command` under `options`.
    ///
    /// Returns `Err` only when the call failed and `throw_on_error` is set.
    pub async fn call(&self, command: &str, options: CallOptions) -> ImagingResult<CommandResult> {
        tracing::debug!(address = %self.address(), command, "Running command");
        let result = self.transport.execute(&self.endpoint, command, &options).await;
        self.apply_policy(command, result, options)
    }

    /// Run `command`, failing on any non-zero exit.
    pub async fn run(&self, command: &str) -> ImagingResult<CommandResult> {
        self.call(command, CallOptions::checked()).await
    }

    /// Run `command` and return its trimmed stdout.
    pub async fn run_stdout(&self, command: &str) -> ImagingResult<String> {
        let result = self.run(command).await?;
        Ok(result.stdout_str().trim().to_string())
    }

    /// Run `command`, returning the result whatever the exit code.
    pub async fn tolerant(&self, command: &str) -> CommandResult {
        self.raw(command, CallOptions::tolerant()).await
    }

    /// Run `command` silently, returning the result whatever the exit code.
    pub async fn probe(&self, command: &str) -> CommandResult {
        self.raw(command, CallOptions::probe()).await
    }

    /// Whether `command` exits zero. Never logs a failure.
    pub async fn succeeds(&self, command: &str) -> bool {
        self.probe(command).await.success()
    }

    pub async fn copy(
        &self,
        local_paths: &[PathBuf],
        remote_target: &str,
        options: CallOptions,
    ) -> ImagingResult<CommandResult> {
        tracing::debug!(
            address = %self.address(),
            files = ?local_paths,
            target = remote_target,
            "Copying files"
        );
        let result = self
            .transport
            .copy(&self.endpoint, local_paths, remote_target, &options)
            .await;
        let label = format!("copy {} -> {}", display_paths(local_paths), remote_target);
        self.apply_policy(&label, result, options)
    }

    async fn raw(&self, command: &str, options: CallOptions) -> CommandResult {
        tracing::debug!(address = %self.address(), command, "Running command");
        let result = self.transport.execute(&self.endpoint, command, &options).await;
        if !result.success() && options.log_on_error {
            self.log_failure(command, &result);
        }
        result
    }

    fn apply_policy(
        &self,
        command: &str,
        result: CommandResult,
        options: CallOptions,
    ) -> ImagingResult<CommandResult> {
        if result.success() {
            return Ok(result);
        }
        if options.log_on_error {
            self.log_failure(command, &result);
        }
        if options.throw_on_error {
            return Err(ImagingError::from_result(self.address(), command, &result));
        }
        Ok(result)
    }

    fn log_failure(&self, command: &str, result: &CommandResult) {
        tracing::warn!(
            address = %self.address(),
            command,
            exit_code = result.exit_code,
            stdout = %result.stdout_str().trim(),
            stderr = %result.stderr_lossy().trim(),
            "Remote command failed"
        );
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote `arg` for a POSIX shell when it contains anything but safe characters.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
