//! Remote paths and markers the imaging workflows rely on.

/// Files whose presence identifies the running image.
pub mod markers {
    /// Present only on the hypervisor distribution.
    pub const AHV_RELEASE: &str = "/etc/nutanix-release";

    /// Present only on the installer image.
    pub const PHOENIX_LAYOUT_FINDER: &str = "/usr/bin/layout_finder.py";

    pub const CENTOS_RELEASE: &str = "/etc/centos-release";

    /// `uname -a` substring of the ESXi kernel (compared lowercase).
    pub const ESX_KERNEL: &str = "vmkernel";

    /// `uname -a` substring of any Linux kernel (compared lowercase).
    pub const LINUX_KERNEL: &str = "linux";

    /// Release file must mention both to count as the holo base image.
    pub const CENTOS_NAME: &str = "Linux";
    pub const CENTOS_VERSION: &str = "7.7";
}

pub mod bootloader {
    pub const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";
    pub const LEGACY_GRUB_CFG: &str = "/boot/grub2/grub.cfg";
    pub const BACKUP_SUFFIX: &str = ".backup";

    pub fn efi_grub_cfg(distro: &str) -> String {
        format!("/boot/efi/EFI/{}/grub.cfg", distro)
    }
}

pub mod mounts {
    pub const BOOT: &str = "/boot";
    pub const HOME: &str = "/home";
    pub const FSTAB: &str = "/etc/fstab";
}

pub mod staging {
    /// Local file names of the downloaded installer payload.
    pub const KERNEL_FILE: &str = "kernel";
    pub const INITRD_FILE: &str = "initrd";
}

pub mod sanitize {
    pub const LOCAL_SCRIPT: &str = "./sanitize_disks.py";
    pub const REMOTE_SCRIPT: &str = "/sanitize_disks.py";
    pub const CONSENT_FLAG: &str = "--i-really-know-what-i-am-doing";
}
