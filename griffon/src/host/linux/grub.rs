//! GRUB2 configuration: firmware mode, menu entries, default entry, backups.

use super::LinuxHost;
use crate::constants::bootloader;
use crate::errors::{ImagingError, ImagingResult};
use crate::transport::shell_quote;
use crate::types::BootTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    Uefi,
    Legacy,
}

/// Menu entry titles of a grub.cfg, in file order.
///
/// Splits each line on single quotes; a line is an entry when its first
/// field is exactly `menuentry ` and the title is the second field.
pub fn parse_menu_entries(grub_cfg: &str) -> Vec<String> {
    grub_cfg
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\'');
            match (fields.next(), fields.next()) {
                (Some("menuentry "), Some(title)) => Some(title.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// First entry whose lowercased title contains the target's menu key.
pub fn select_menu_entry(entries: &[String], target: BootTarget) -> Option<&str> {
    let key = target.menu_key();
    entries
        .iter()
        .find(|entry| entry.to_lowercase().contains(key))
        .map(String::as_str)
}

/// Escape `value` for the replacement side of a `s/.../.../` sed expression.
fn sed_replacement(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '/' | '&') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl LinuxHost {
    pub async fn detect_firmware_mode(&self) -> FirmwareMode {
        let efi = self
            .remote
            .succeeds(&format!("test -d {}", bootloader::EFI_FIRMWARE_DIR))
            .await;
        if efi {
            FirmwareMode::Uefi
        } else {
            FirmwareMode::Legacy
        }
    }

    /// Path of the grub.cfg the firmware actually reads.
    pub async fn grub_config_path(&self) -> String {
        match self.detect_firmware_mode().await {
            FirmwareMode::Uefi => bootloader::efi_grub_cfg(&self.settings().efi_distro),
            FirmwareMode::Legacy => bootloader::LEGACY_GRUB_CFG.to_string(),
        }
    }

    pub async fn list_menu_entries(&self, config_path: &str) -> ImagingResult<Vec<String>> {
        let out = self
            .remote
            .run(&format!("cat {}", shell_quote(config_path)))
            .await
            .inspect_err(|e| {
                tracing::warn!(config_path, error = %e, "Error enumerating existing grub menu entries")
            })?;
        Ok(parse_menu_entries(&out.stdout_str()))
    }

    /// Point `GRUB_DEFAULT` at `name`. Takes effect after regeneration.
    pub async fn set_default_entry(&self, name: &str) -> ImagingResult<()> {
        let expr = format!(
            "s/GRUB_DEFAULT=.*/GRUB_DEFAULT=\"{}\"/g",
            sed_replacement(name)
        );
        self.remote
            .run(&format!(
                "sed -i {} {}",
                shell_quote(&expr),
                shell_quote(&self.settings().grub_defaults)
            ))
            .await?;
        tracing::info!(address = %self.remote.address(), entry = name, "Updated default grub entry");
        Ok(())
    }

    /// Rebuild `config_path` from the installed kernels and grub defaults.
    pub async fn regenerate_config(&self, config_path: &str) -> ImagingResult<()> {
        self.remote
            .run(&format!("grub2-mkconfig --output={}", shell_quote(config_path)))
            .await?;
        tracing::debug!(address = %self.remote.address(), config_path, "Regenerated grub config");
        Ok(())
    }

    /// Menu entry for `target`, or `MenuEntryNotFound`.
    pub(super) async fn find_menu_entry(
        &self,
        config_path: &str,
        target: BootTarget,
    ) -> ImagingResult<String> {
        let entries = self.list_menu_entries(config_path).await?;
        select_menu_entry(&entries, target)
            .map(str::to_string)
            .ok_or_else(|| ImagingError::MenuEntryNotFound {
                target,
                menu_key: target.menu_key().to_string(),
                config_path: config_path.to_string(),
            })
    }
}

/// Copy of a bootloader config taken before mutating it.
///
/// Restoring is explicit: only the failure branches that call
/// [`BootConfigBackup::rollback`] get the original file back.
#[derive(Debug, Clone)]
pub struct BootConfigBackup {
    config_path: String,
}

impl BootConfigBackup {
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn backup_path(&self) -> String {
        format!("{}{}", self.config_path, bootloader::BACKUP_SUFFIX)
    }

    /// Take the backup. The outcome is reported but not checked.
    pub async fn take(&self, host: &LinuxHost) {
        let result = host
            .remote
            .tolerant(&format!(
                "cp {} {}",
                shell_quote(&self.config_path),
                shell_quote(&self.backup_path())
            ))
            .await;
        tracing::info!(
            config_path = %self.config_path,
            exit_code = result.exit_code,
            "Backed up grub configuration"
        );
    }

    pub async fn rollback(&self, host: &LinuxHost) -> ImagingResult<()> {
        tracing::info!(config_path = %self.config_path, "Reverting grub configuration changes");
        host.remote
            .run(&format!(
                "mv {} {}",
                shell_quote(&self.backup_path()),
                shell_quote(&self.config_path)
            ))
            .await?;
        Ok(())
    }
}
