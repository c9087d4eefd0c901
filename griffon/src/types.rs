//! Core value types passed between the transport, detector and hosts.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ImagingError, ImagingResult};

/// Default user for host operations.
pub const DEFAULT_USER: &str = "root";

/// One reachable node. Immutable for the lifetime of a host.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub address: String,
    pub username: String,
    pub password: String,
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
}

impl RemoteEndpoint {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            default_timeout: crate::settings::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// OS family of a node, as classified by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Unknown,
    Esx,
    Ahv,
    Phoenix,
    CentOs,
}

impl OsFamily {
    /// Families handled by the Linux host implementation.
    pub fn is_linux_family(&self) -> bool {
        matches!(self, OsFamily::Ahv | OsFamily::Phoenix | OsFamily::CentOs)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Unknown => "unknown",
            OsFamily::Esx => "esx",
            OsFamily::Ahv => "ahv",
            OsFamily::Phoenix => "phoenix",
            OsFamily::CentOs => "centos",
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image a node can be made to boot into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootTarget {
    Holo,
    Phoenix,
    Ahv,
}

impl BootTarget {
    pub const ALL: [BootTarget; 3] = [BootTarget::Holo, BootTarget::Phoenix, BootTarget::Ahv];

    /// Parse a caller-supplied target name (case-insensitive).
    pub fn parse(name: &str) -> ImagingResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "holo" => Ok(BootTarget::Holo),
            "phoenix" => Ok(BootTarget::Phoenix),
            "ahv" => Ok(BootTarget::Ahv),
            _ => Err(ImagingError::InvalidTarget(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BootTarget::Holo => "holo",
            BootTarget::Phoenix => "phoenix",
            BootTarget::Ahv => "ahv",
        }
    }

    /// Substring identifying this target's grub menu entry.
    pub fn menu_key(&self) -> &'static str {
        match self {
            BootTarget::Holo => "holo",
            BootTarget::Phoenix => "phoenix",
            BootTarget::Ahv => "nutanix",
        }
    }

    /// OS family the detector reports once the node runs this target.
    ///
    /// Holo is a stock CentOS 7.7 image, so it is recognized by the release file.
    pub fn expected_family(&self) -> OsFamily {
        match self {
            BootTarget::Holo => OsFamily::CentOs,
            BootTarget::Phoenix => OsFamily::Phoenix,
            BootTarget::Ahv => OsFamily::Ahv,
        }
    }
}

impl std::fmt::Display for BootTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BootTarget {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BootTarget::parse(s)
    }
}

/// A block device and its filesystem UUID (not the PARTUUID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device_path: String,
    pub uuid: String,
}

/// Output of one remote call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl CommandResult {
    /// Exit code reported when no remote exit status was received.
    pub const TRANSPORT_FAILURE: i32 = -1;

    pub fn new(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
        }
    }

    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self::new(stdout.into(), Vec::new(), 0)
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::new(
            Vec::new(),
            message.into().into_bytes(),
            Self::TRANSPORT_FAILURE,
        )
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stdout_lossy(&self) -> String {
        self.stdout_str().into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Ordered mapping from a staged local file to its remote destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingManifest {
    entries: Vec<(PathBuf, Vec<String>)>,
}

impl StagingManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, local: impl Into<PathBuf>, remote: Vec<String>) -> Self {
        self.entries.push((local.into(), remote));
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (&PathBuf, &[String])> {
        self.entries
            .iter()
            .map(|(local, remote)| (local, remote.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
