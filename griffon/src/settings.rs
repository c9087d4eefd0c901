//! Tunables for the imaging control plane.
//!
//! `ImagingSettings` carries every timeout, budget and remote path the hosts
//! use. Defaults match the production fleet layout; callers override
//! individual fields and call [`ImagingSettings::sanitize`] before use.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ImagingError, ImagingResult};
use crate::types::BootTarget;

/// Default deadline for a single remote command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Default ceiling on live remote sessions across all workflows.
pub const DEFAULT_SESSION_LIMIT: usize = 32;

/// Seconds between convergence probes.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Probe budget for routine target switches (5 minutes).
pub const ROUTINE_WAIT_CYCLES: u32 = 6 * 5;

/// Probe budget for the first boot after staging (1 hour).
pub const FIRST_BOOT_WAIT_CYCLES: u32 = 6 * 60;

/// Bounded polling budget for convergence waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitBudget {
    pub cycles: u32,
    pub interval: Duration,
}

impl WaitBudget {
    pub const fn new(cycles: u32, interval: Duration) -> Self {
        Self { cycles, interval }
    }

    pub const fn routine() -> Self {
        Self::new(ROUTINE_WAIT_CYCLES, CHECK_INTERVAL)
    }

    pub const fn first_boot() -> Self {
        Self::new(FIRST_BOOT_WAIT_CYCLES, CHECK_INTERVAL)
    }

    pub fn total(&self) -> Duration {
        self.interval * self.cycles
    }
}

/// Kernel image file names under `/boot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelNames {
    pub holo: String,
    pub phoenix: String,
    pub ahv: String,
    pub phoenix_initrd: String,
    pub holo_initrd: String,
    /// Stock kernel shipped with the holo image, renamed during staging.
    pub base_kernel: String,
    pub base_initrd: String,
}

impl Default for KernelNames {
    fn default() -> Self {
        Self {
            holo: "kernel-holo".to_string(),
            phoenix: "kernel-phoenix".to_string(),
            ahv: "vmlinuz-4.19.84-2.el7.nutanix.20190916.123.x86_64".to_string(),
            phoenix_initrd: "initrd-phoenix".to_string(),
            holo_initrd: "initrd-holo".to_string(),
            base_kernel: "vmlinuz-3.10.0-1062.el7.x86_64".to_string(),
            base_initrd: "initramfs-3.10.0-1062.el7.x86_64.img".to_string(),
        }
    }
}

impl KernelNames {
    pub fn for_target(&self, target: BootTarget) -> &str {
        match target {
            BootTarget::Holo => &self.holo,
            BootTarget::Phoenix => &self.phoenix,
            BootTarget::Ahv => &self.ahv,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingSettings {
    /// Maximum concurrently open remote sessions.
    pub session_limit: usize,
    /// Deadline applied to remote calls that do not set their own.
    pub command_timeout: Duration,
    /// Budget for routine target switches.
    pub routine_wait: WaitBudget,
    /// Budget for the first boot after a payload was staged.
    pub first_boot_wait: WaitBudget,
    /// Local directory holding downloaded payloads.
    pub staging_dir: PathBuf,
    /// Directory with `*_cmdline.cfg` templates overriding the embedded ones.
    pub template_dir: Option<PathBuf>,
    /// Directory name under `/boot/efi/EFI` holding grub.cfg on UEFI nodes.
    pub efi_distro: String,
    /// System-wide grub defaults file.
    pub grub_defaults: String,
    /// Remote directory receiving staged payloads.
    pub remote_boot_dir: String,
    pub kernels: KernelNames,
    /// Address the node uses to reach this imaging server. Derived from the
    /// local routing table when unset.
    pub foundation_ip: Option<IpAddr>,
    pub foundation_port: u16,
    /// Attempts per file when copying payloads.
    pub copy_attempts: u32,
    pub http_timeout: Duration,
}

impl Default for ImagingSettings {
    fn default() -> Self {
        Self {
            session_limit: DEFAULT_SESSION_LIMIT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            routine_wait: WaitBudget::routine(),
            first_boot_wait: WaitBudget::first_boot(),
            staging_dir: PathBuf::from("staging"),
            template_dir: None,
            efi_distro: "centos".to_string(),
            grub_defaults: "/etc/default/grub".to_string(),
            remote_boot_dir: "/boot".to_string(),
            kernels: KernelNames::default(),
            foundation_ip: None,
            foundation_port: 8000,
            copy_attempts: 3,
            http_timeout: Duration::from_secs(600),
        }
    }
}

impl ImagingSettings {
    /// Validate settings before any remote call is issued.
    pub fn sanitize(&self) -> ImagingResult<()> {
        if self.session_limit == 0 {
            return Err(ImagingError::Config(
                "session_limit must be at least 1".into(),
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(ImagingError::Config(
                "command_timeout cannot be zero".into(),
            ));
        }
        for (name, budget) in [
            ("routine_wait", &self.routine_wait),
            ("first_boot_wait", &self.first_boot_wait),
        ] {
            if budget.cycles == 0 {
                return Err(ImagingError::Config(format!(
                    "{} must allow at least one cycle",
                    name
                )));
            }
        }
        if self.copy_attempts == 0 {
            return Err(ImagingError::Config(
                "copy_attempts must be at least 1".into(),
            ));
        }
        if self.efi_distro.is_empty() || self.efi_distro.contains('/') {
            return Err(ImagingError::Config(format!(
                "invalid efi_distro '{}'",
                self.efi_distro
            )));
        }
        Ok(())
    }

    /// Remote path of a file inside the boot directory.
    pub fn boot_path(&self, name: &str) -> String {
        format!("{}/{}", self.remote_boot_dir.trim_end_matches('/'), name)
    }

    pub fn kernel_path(&self, target: BootTarget) -> String {
        self.boot_path(self.kernels.for_target(target))
    }
}
