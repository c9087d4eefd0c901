//! Boot configuration payload handed to every workflow.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{ImagingError, ImagingResult};

/// A downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoenixPayload {
    pub kernel: Artifact,
    pub initrd: Artifact,
    pub livefs: Artifact,
    /// Installer boot script, e.g. `INSTALLER`. Lowercased when rendered.
    pub mode: String,
}

/// Partition index on the boot disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRef {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// AHV root filesystem.
    pub nutanix: PartitionRef,
    pub holo: PartitionRef,
}

/// Read-only input of one boot transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    /// Control-plane callback; also serves the node's [`NetworkDescriptor`].
    pub arizona_url: String,
    pub host_ip: String,
    pub host_subnet_mask: String,
    pub default_gw: String,
    #[serde(default)]
    pub svm_vlan_id: String,
    pub phoenix: PhoenixPayload,
    pub partition_table: PartitionTable,
}

impl BootConfig {
    pub fn from_json(data: &[u8]) -> ImagingResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ImagingError::Config(format!("invalid json data in config: {}", e)))
    }

    pub fn from_file(path: &Path) -> ImagingResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            ImagingError::Config(format!("unable to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&data)
    }
}

/// Network parameters served by the control plane for the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub host_ip: String,
    pub host_subnet_mask: String,
    pub default_gw: String,
    #[serde(default)]
    pub svm_vlan_id: String,
}

impl NetworkDescriptor {
    pub fn from_json(data: &[u8]) -> ImagingResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| ImagingError::Config(format!("invalid network descriptor: {}", e)))
    }
}

/// Where a workflow reads its [`BootConfig`] from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Path(PathBuf),
    Value(serde_json::Value),
}

impl ConfigSource {
    pub fn load(&self) -> ImagingResult<BootConfig> {
        match self {
            ConfigSource::Path(path) => BootConfig::from_file(path),
            ConfigSource::Value(value) => serde_json::from_value(value.clone())
                .map_err(|e| ImagingError::Config(format!("invalid json data in config: {}", e))),
        }
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<serde_json::Value> for ConfigSource {
    fn from(value: serde_json::Value) -> Self {
        ConfigSource::Value(value)
    }
}
