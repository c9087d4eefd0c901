//! SSH transport backed by `russh`.

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::pool::SessionPool;
use super::{CallOptions, Deadline, Transport, scp};
use crate::types::{CommandResult, RemoteEndpoint};

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Error)]
pub(super) enum SessionFailure {
    #[error("ssh: {0}")]
    Ssh(#[from] russh::Error),

    #[error("authentication rejected for user '{0}'")]
    AuthRejected(String),

    #[error("scp: {0}")]
    Scp(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts any host key and remembers nothing.
pub(super) struct TrustOnFirstUse {
    address: String,
}

#[async_trait]
impl client::Handler for TrustOnFirstUse {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            address = %self.address,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting host key"
        );
        Ok(true)
    }
}

/// Password-authenticated SSH sessions, one per call, bounded by a [`SessionPool`].
#[derive(Debug, Clone)]
pub struct SshTransport {
    pool: SessionPool,
    port: u16,
}

impl SshTransport {
    pub fn new(pool: SessionPool) -> Self {
        Self {
            pool,
            port: DEFAULT_SSH_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    async fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        deadline: Deadline,
    ) -> Result<Handle<TrustOnFirstUse>, SessionFailure> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(deadline.remaining()),
            ..Default::default()
        });
        let handler = TrustOnFirstUse {
            address: endpoint.address.clone(),
        };
        let mut handle =
            client::connect(config, (endpoint.address.as_str(), self.port), handler).await?;

        if !handle
            .authenticate_password(endpoint.username.as_str(), endpoint.password.as_str())
            .await?
        {
            return Err(SessionFailure::AuthRejected(endpoint.username.clone()));
        }
        Ok(handle)
    }

    async fn exec_session(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
        deadline: Deadline,
    ) -> Result<CommandResult, SessionFailure> {
        let handle = self.connect(endpoint, deadline).await?;
        let mut channel = handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        // Keep draining after the exit status: output may still be in flight.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                _ => {}
            }
        }
        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;

        match exit_code {
            Some(code) => Ok(CommandResult::new(stdout, stderr, code)),
            None => {
                stderr.extend_from_slice(b"channel closed without exit status");
                Ok(CommandResult::new(
                    stdout,
                    stderr,
                    CommandResult::TRANSPORT_FAILURE,
                ))
            }
        }
    }

    async fn copy_session(
        &self,
        endpoint: &RemoteEndpoint,
        local_paths: &[PathBuf],
        remote_target: &str,
        deadline: Deadline,
    ) -> Result<CommandResult, SessionFailure> {
        let handle = self.connect(endpoint, deadline).await?;
        let channel = handle.channel_open_session().await?;
        let result = scp::send_files(channel, local_paths, remote_target).await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
        result.map(|_| CommandResult::default())
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(SessionPool::default())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
        options: &CallOptions,
    ) -> CommandResult {
        let outcome = self
            .pool
            .run(options.budget(endpoint), |deadline| {
                self.exec_session(endpoint, command, deadline)
            })
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CommandResult::transport_failure(e.to_string()),
            Err(e) => CommandResult::transport_failure(e.to_string()),
        }
    }

    async fn copy(
        &self,
        endpoint: &RemoteEndpoint,
        local_paths: &[PathBuf],
        remote_target: &str,
        options: &CallOptions,
    ) -> CommandResult {
        if local_paths.is_empty() {
            return CommandResult::default();
        }
        let outcome = self
            .pool
            .run(options.budget(endpoint), |deadline| {
                self.copy_session(endpoint, local_paths, remote_target, deadline)
            })
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => CommandResult::transport_failure(e.to_string()),
            Err(e) => CommandResult::transport_failure(e.to_string()),
        }
    }
}
