//! Minimal SCP source side, spoken over an exec channel running `scp -t`.
//!
//! For each file: wait for the sink's ready byte, send the `C` header, stream
//! the contents, send a terminating zero byte and wait for the ack.

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::path::{Path, PathBuf};

use super::shell_quote;
use super::ssh::SessionFailure;

const FILE_MODE: &str = "0644";

pub(super) async fn send_files(
    mut channel: Channel<Msg>,
    local_paths: &[PathBuf],
    remote_target: &str,
) -> Result<(), SessionFailure> {
    let command = if local_paths.len() > 1 {
        format!("scp -d -t {}", shell_quote(remote_target))
    } else {
        format!("scp -t {}", shell_quote(remote_target))
    };
    channel.exec(true, command).await?;
    read_ack(&mut channel).await?;

    for path in local_paths {
        send_file(&mut channel, path).await?;
    }

    channel.eof().await?;
    while let Some(msg) = channel.wait().await {
        if let ChannelMsg::ExitStatus { exit_status } = msg {
            if exit_status != 0 {
                return Err(SessionFailure::Scp(format!(
                    "remote scp exited with {}",
                    exit_status
                )));
            }
        }
    }
    Ok(())
}

async fn send_file(channel: &mut Channel<Msg>, path: &Path) -> Result<(), SessionFailure> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SessionFailure::Scp(format!("invalid file name: {}", path.display())))?;
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();

    let header = format!("C{} {} {}\n", FILE_MODE, size, name);
    channel.data(header.as_bytes()).await?;
    read_ack(channel).await?;

    channel.data(file).await?;
    channel.data(&[0u8][..]).await?;
    read_ack(channel).await?;

    tracing::trace!(file = %path.display(), size, "Sent file");
    Ok(())
}

/// Wait for the sink's status byte: 0 is ok, 1 and 2 carry an error line.
async fn read_ack(channel: &mut Channel<Msg>) -> Result<(), SessionFailure> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) if data.is_empty() => continue,
            Some(ChannelMsg::Data { data }) if data[0] == 0 => return Ok(()),
            Some(ChannelMsg::Data { data }) => {
                return Err(SessionFailure::Scp(
                    String::from_utf8_lossy(&data[1..]).trim().to_string(),
                ));
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                return Err(SessionFailure::Scp(format!(
                    "remote scp exited with {} before acknowledging",
                    exit_status
                )));
            }
            Some(_) => continue,
            None => {
                return Err(SessionFailure::Scp(
                    "channel closed before acknowledging".into(),
                ));
            }
        }
    }
}
