//! Partition discovery and filesystem UUID resolution.

use std::collections::HashMap;

use super::LinuxHost;
use crate::constants::mounts;
use crate::errors::{ImagingError, ImagingResult};
use crate::transport::shell_quote;
use crate::types::Partition;

/// Device holding the mount, from `df <mountpoint>` output.
///
/// The first line is the column header; the device is the first token of the
/// second line.
pub fn parse_df_device(output: &str) -> ImagingResult<String> {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
        .ok_or_else(|| ImagingError::NotFound(format!("no mount found in df output: {:?}", output.trim())))
}

/// Filesystem UUID from `blkid <device>` output.
///
/// Matches the `UUID` key only, never `PARTUUID`.
pub fn parse_blkid_uuid(output: &str) -> ImagingResult<String> {
    output
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("uuid"))
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|uuid| !uuid.is_empty())
        .ok_or_else(|| ImagingError::NotFound(format!("no UUID in blkid output: {:?}", output.trim())))
}

impl LinuxHost {
    async fn mount_device(&self, mountpoint: &str) -> ImagingResult<String> {
        let out = self.remote.run_stdout(&format!("df {}", mountpoint)).await?;
        parse_df_device(&out).inspect_err(|e| {
            tracing::warn!(address = %self.remote.address(), mountpoint, error = %e, "Unable to find partition")
        })
    }

    pub async fn boot_partition_device(&self) -> ImagingResult<String> {
        self.mount_device(mounts::BOOT).await
    }

    pub async fn home_partition_device(&self) -> ImagingResult<String> {
        self.mount_device(mounts::HOME).await
    }

    pub async fn partition_uuid(&self, device: &str) -> ImagingResult<String> {
        let out = self
            .remote
            .run_stdout(&format!("blkid {}", shell_quote(device)))
            .await?;
        parse_blkid_uuid(&out)
    }

    /// Device of partition `index` on the disk that holds `/boot`.
    pub async fn partition_device(&self, index: u32) -> ImagingResult<String> {
        let boot = self.boot_partition_device().await?;
        Ok(sibling_partition(&boot, index))
    }
}

/// Replace the trailing partition number of `boot_device` with `index`.
fn sibling_partition(boot_device: &str, index: u32) -> String {
    let disk = boot_device.trim_end_matches(|c: char| c.is_ascii_digit());
    format!("{}{}", disk, index)
}

/// Partition lookups resolved once per host operation.
///
/// Re-resolving mid-operation could observe a mount table that changed under
/// concurrent probes.
#[derive(Debug, Default)]
pub struct PartitionCache {
    boot_device: Option<String>,
    uuids: HashMap<String, String>,
}

impl PartitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn boot_device(&mut self, host: &LinuxHost) -> ImagingResult<String> {
        if let Some(device) = &self.boot_device {
            return Ok(device.clone());
        }
        let device = host.boot_partition_device().await?;
        self.boot_device = Some(device.clone());
        Ok(device)
    }

    pub async fn uuid(&mut self, host: &LinuxHost, device: &str) -> ImagingResult<String> {
        if let Some(uuid) = self.uuids.get(device) {
            return Ok(uuid.clone());
        }
        let uuid = host.partition_uuid(device).await?;
        tracing::debug!(device, uuid = %uuid, "Resolved partition UUID");
        self.uuids.insert(device.to_string(), uuid.clone());
        Ok(uuid)
    }

    /// Partition `index` of the boot disk with its filesystem UUID.
    pub async fn partition(&mut self, host: &LinuxHost, index: u32) -> ImagingResult<Partition> {
        let boot = self.boot_device(host).await?;
        let device_path = sibling_partition(&boot, index);
        let uuid = self.uuid(host, &device_path).await?;
        Ok(Partition { device_path, uuid })
    }
}
