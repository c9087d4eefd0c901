//! Scripted stand-in for a remote node, shared by unit tests.
//!
//! `FakeNode` answers the commands the hosts issue the way a real AHV,
//! Phoenix or holo node would, keeps enough state to simulate grub
//! regeneration and reboots, and records every call for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::{bootloader, markers, mounts};
use crate::errors::ImagingResult;
use crate::fetch::Fetcher;
use crate::host::{CmdlineTemplates, HostContext, LinuxHost};
use crate::settings::{ImagingSettings, KernelNames};
use crate::transport::{CallOptions, Remote, Transport};
use crate::types::{CommandResult, OsFamily, RemoteEndpoint};

pub(crate) const NODE_ADDRESS: &str = "10.1.1.10";

const CENTOS_77_RELEASE: &str = "CentOS Linux release 7.7.1908 (Core)";

const DEFAULT_MENU_ENTRIES: [&str; 3] = [
    "Nutanix AHV (4.19.84-2.el7.nutanix.20190916.123.x86_64)",
    "Phoenix",
    "holo",
];

const DEFAULT_FSTAB: &str = "\
UUID=boot-uuid /boot ext4 defaults 1 2
UUID=ahv-root-uuid / ext4 defaults 1 1
UUID=holo-root-uuid /holo ext4 defaults 1 2
";

struct Failure {
    pattern: String,
    exit_code: i32,
    stderr: String,
}

struct NodeState {
    family: OsFamily,
    release: String,
    files: BTreeSet<String>,
    reachable: bool,
    unreachable_probes: u32,
    efi: bool,
    menu_entries: Vec<String>,
    grub_default: Option<String>,
    kernel_args: BTreeMap<String, String>,
    blkid: BTreeMap<String, String>,
    fstab: String,
    failures: Vec<Failure>,
    failing_copies: u32,
    copies: Vec<(Vec<PathBuf>, String)>,
    calls: Vec<String>,
    budgets: Vec<(String, Duration)>,
    never_return: bool,
    boot_override: Option<OsFamily>,
    last_reboot: Option<Instant>,
}

pub(crate) struct FakeNode {
    state: Mutex<NodeState>,
}

fn marker_files(family: OsFamily) -> &'static [&'static str] {
    match family {
        OsFamily::Ahv => &[markers::AHV_RELEASE, markers::CENTOS_RELEASE],
        OsFamily::Phoenix => &[markers::PHOENIX_LAYOUT_FINDER],
        OsFamily::CentOs => &[markers::CENTOS_RELEASE],
        OsFamily::Esx | OsFamily::Unknown => &[],
    }
}

fn uname(family: OsFamily) -> &'static str {
    match family {
        OsFamily::Esx => "VMkernel esx01 7.0.3 #1 SMP Release build-19193900 x86_64 x86_64 x86_64 ESXi",
        OsFamily::Unknown => "Darwin build.local 23.1.0 Darwin Kernel Version 23.1.0 arm64",
        _ => "Linux node-7 4.19.84-2.el7.nutanix.x86_64 #1 SMP x86_64 x86_64 x86_64 GNU/Linux",
    }
}

fn blkid_line(device: &str, uuid: &str) -> String {
    format!("{}: UUID=\"{}\" TYPE=\"ext4\" PARTUUID=\"part-{}\"", device, uuid, uuid)
}

/// Undo `shell_quote` for a single argument.
fn unquote(arg: &str) -> String {
    match arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')) {
        Some(inner) => inner.replace(r"'\''", "'"),
        None => arg.to_string(),
    }
}

fn unescape_sed(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn ok() -> CommandResult {
    CommandResult::default()
}

fn fail(exit_code: i32, stderr: &str) -> CommandResult {
    CommandResult::new(Vec::new(), stderr.as_bytes().to_vec(), exit_code)
}

impl FakeNode {
    /// A reachable node running `family` with a stock disk layout.
    pub(crate) fn booted(family: OsFamily) -> Self {
        let kernels = KernelNames::default();
        let mut files: BTreeSet<String> = marker_files(family).iter().map(|f| f.to_string()).collect();
        files.insert(format!("/boot/{}", kernels.base_kernel));
        files.insert(format!("/boot/{}", kernels.base_initrd));
        files.insert(bootloader::LEGACY_GRUB_CFG.to_string());
        files.insert("/etc/default/grub".to_string());
        files.insert(mounts::FSTAB.to_string());

        let blkid = [
            ("/dev/sda1", "boot-uuid"),
            ("/dev/sda3", "ahv-root-uuid"),
            ("/dev/sda4", "holo-root-uuid"),
        ]
        .into_iter()
        .map(|(device, uuid)| (device.to_string(), blkid_line(device, uuid)))
        .collect();

        Self {
            state: Mutex::new(NodeState {
                family,
                release: CENTOS_77_RELEASE.to_string(),
                files,
                reachable: true,
                unreachable_probes: 0,
                efi: false,
                menu_entries: DEFAULT_MENU_ENTRIES.iter().map(|e| e.to_string()).collect(),
                grub_default: None,
                kernel_args: BTreeMap::new(),
                blkid,
                fstab: DEFAULT_FSTAB.to_string(),
                failures: Vec::new(),
                failing_copies: 0,
                copies: Vec::new(),
                calls: Vec::new(),
                budgets: Vec::new(),
                never_return: false,
                boot_override: None,
                last_reboot: None,
            }),
        }
    }

    pub(crate) fn address(&self) -> &'static str {
        NODE_ADDRESS
    }

    pub(crate) fn add_file(&self, path: &str) {
        self.state.lock().files.insert(path.to_string());
    }

    pub(crate) fn set_release(&self, text: &str) {
        let mut state = self.state.lock();
        state.release = text.to_string();
        state.files.insert(markers::CENTOS_RELEASE.to_string());
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Fail the next `n` calls as if the node were down.
    pub(crate) fn set_unreachable_probes(&self, n: u32) {
        self.state.lock().unreachable_probes = n;
    }

    pub(crate) fn set_uuid(&self, device: &str, uuid: &str) {
        self.state
            .lock()
            .blkid
            .insert(device.to_string(), blkid_line(device, uuid));
    }

    pub(crate) fn set_blkid_output(&self, device: &str, output: &str) {
        self.state
            .lock()
            .blkid
            .insert(device.to_string(), output.to_string());
    }

    pub(crate) fn set_efi(&self, efi: bool) {
        let mut state = self.state.lock();
        state.efi = efi;
        state.files.insert(bootloader::efi_grub_cfg("centos"));
    }

    pub(crate) fn set_menu_entries(&self, entries: &[&str]) {
        self.state.lock().menu_entries = entries.iter().map(|e| e.to_string()).collect();
    }

    pub(crate) fn set_kernel_args(&self, kernel: &str, args: &str) {
        self.state
            .lock()
            .kernel_args
            .insert(kernel.to_string(), args.to_string());
    }

    /// Make every command segment starting with `pattern` exit with `exit_code`.
    pub(crate) fn fail_command(&self, pattern: &str, exit_code: i32, stderr: &str) {
        self.state.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
    }

    pub(crate) fn fail_copies(&self, n: u32) {
        self.state.lock().failing_copies = n;
    }

    pub(crate) fn never_return_after_reboot(&self) {
        self.state.lock().never_return = true;
    }

    /// Ignore the grub default and come back as `family` on reboot.
    pub(crate) fn boot_into_after_reboot(&self, family: OsFamily) {
        self.state.lock().boot_override = Some(family);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub(crate) fn count_calls(&self, command: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == command).count()
    }

    pub(crate) fn count_calls_starting_with(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Calls that touch the bootloader or power state.
    pub(crate) fn bootloader_calls(&self) -> usize {
        const MUTATING: [&str; 6] = ["grub2-mkconfig", "grubby", "sed ", "reboot", "cp ", "mv "];
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| MUTATING.iter().any(|m| c.starts_with(m)))
            .count()
    }

    /// Deadline budget the transport was handed for the first call starting with `prefix`.
    pub(crate) fn budget_of(&self, prefix: &str) -> Option<Duration> {
        self.state
            .lock()
            .budgets
            .iter()
            .find(|(command, _)| command.starts_with(prefix))
            .map(|(_, budget)| *budget)
    }

    pub(crate) fn budgets(&self) -> Vec<Duration> {
        self.state.lock().budgets.iter().map(|(_, b)| *b).collect()
    }

    pub(crate) fn kernel_args(&self, kernel: &str) -> Option<String> {
        self.state.lock().kernel_args.get(kernel).cloned()
    }

    pub(crate) fn grub_default(&self) -> Option<String> {
        self.state.lock().grub_default.clone()
    }

    pub(crate) fn current_family(&self) -> OsFamily {
        self.state.lock().family
    }

    pub(crate) fn last_reboot_at(&self) -> Option<Instant> {
        self.state.lock().last_reboot
    }

    pub(crate) fn has_file(&self, path: &str) -> bool {
        self.state.lock().files.contains(path)
    }

    pub(crate) fn fstab(&self) -> String {
        self.state.lock().fstab.clone()
    }

    pub(crate) fn copies(&self) -> Vec<(Vec<PathBuf>, String)> {
        self.state.lock().copies.clone()
    }

    fn down(state: &mut NodeState) -> bool {
        if !state.reachable {
            return true;
        }
        if state.unreachable_probes > 0 {
            state.unreachable_probes -= 1;
            return true;
        }
        false
    }

    fn run(state: &mut NodeState, command: &str) -> CommandResult {
        let mut last = ok();
        for segment in command.split(" && ") {
            last = Self::run_segment(state, segment.trim());
            if !last.success() {
                break;
            }
        }
        last
    }

    fn run_segment(state: &mut NodeState, segment: &str) -> CommandResult {
        if let Some(failure) = state.failures.iter().find(|f| segment.starts_with(&f.pattern)) {
            return fail(failure.exit_code, &failure.stderr);
        }
        if segment == "reboot -f" {
            return Self::reboot(state);
        }

        let args: Vec<&str> = segment.split_whitespace().collect();
        match args.as_slice() {
            ["true"] => ok(),
            ["uname", "-a"] => CommandResult::ok(format!("{}\n", uname(state.family))),
            ["test", "-f", path] => Self::exit_if(state.files.contains(*path)),
            ["test", "-d", path] => Self::exit_if(state.efi && *path == bootloader::EFI_FIRMWARE_DIR),
            ["df", mountpoint] => Self::df(mountpoint),
            ["blkid", device] => match state.blkid.get(*device) {
                Some(line) => CommandResult::ok(format!("{}\n", line)),
                None => fail(2, ""),
            },
            ["cat", path] => Self::cat(state, path),
            ["grub2-mkconfig", output] => match output.strip_prefix("--output=") {
                Some(path) => {
                    state.files.insert(unquote(path));
                    ok()
                }
                None => fail(1, "grub2-mkconfig: missing --output"),
            },
            ["grubby", "--info", kernel] => {
                let kernel = unquote(kernel);
                let args = state.kernel_args.get(&kernel).cloned().unwrap_or_default();
                CommandResult::ok(format!("index=0\nkernel={}\nargs=\"{}\"\nroot=UUID=boot-uuid\n", kernel, args))
            }
            ["grubby", ..] => Self::grubby(state, segment),
            ["sed", "-i", ..] if segment.contains("GRUB_DEFAULT=") => Self::set_grub_default(state, segment),
            ["sed", "-i.bak", expr, path] if *path == mounts::FSTAB => Self::sed_fstab(state, expr),
            ["cp", src, dst] => {
                if !state.files.contains(*src) {
                    return fail(1, "cp: cannot stat: No such file or directory");
                }
                state.files.insert(dst.to_string());
                ok()
            }
            ["mv", src, dst] => {
                if !state.files.remove(*src) {
                    return fail(1, "mv: cannot stat: No such file or directory");
                }
                state.files.insert(dst.to_string());
                ok()
            }
            ["chmod", "+x", path] => Self::exit_if(state.files.contains(*path)),
            [program, ..] if state.files.contains(*program) => ok(),
            _ => fail(127, "command not found"),
        }
    }

    fn exit_if(condition: bool) -> CommandResult {
        if condition { ok() } else { fail(1, "") }
    }

    fn df(mountpoint: &str) -> CommandResult {
        let device = match mountpoint {
            "/boot" => "/dev/sda1",
            "/home" => "/dev/sda4",
            _ => return fail(1, "df: no file systems processed"),
        };
        CommandResult::ok(format!(
            "Filesystem     1K-blocks   Used Available Use% Mounted on\n{}         999320 187260    743248  21% {}\n",
            device, mountpoint
        ))
    }

    fn cat(state: &NodeState, path: &str) -> CommandResult {
        let path = unquote(path);
        if !state.files.contains(&path) {
            return fail(1, "cat: No such file or directory");
        }
        if path == markers::CENTOS_RELEASE {
            return CommandResult::ok(format!("{}\n", state.release));
        }
        if path == mounts::FSTAB {
            return CommandResult::ok(state.fstab.clone());
        }
        if path.ends_with("grub.cfg") {
            let menu: String = state
                .menu_entries
                .iter()
                .map(|entry| format!("menuentry '{}' --class gnu-linux {{\n}}\n", entry))
                .collect();
            return CommandResult::ok(format!("### BEGIN /etc/grub.d/10_linux ###\n{}", menu));
        }
        ok()
    }

    fn grubby(state: &mut NodeState, segment: &str) -> CommandResult {
        let Some((head, kernel)) = segment.rsplit_once(" --update-kernel ") else {
            return fail(1, "grubby: no kernel specified");
        };
        let kernel = unquote(kernel);
        let current = state.kernel_args.get(&kernel).cloned().unwrap_or_default();

        let updated = if let Some(remove) = head.strip_prefix("grubby --remove-args=") {
            let remove = unquote(remove);
            let drop: BTreeSet<&str> = remove.split_whitespace().collect();
            current
                .split_whitespace()
                .filter(|arg| !drop.contains(arg))
                .collect::<Vec<_>>()
                .join(" ")
        } else if let Some(add) = head.strip_prefix("grubby --args=") {
            let add = unquote(add);
            current
                .split_whitespace()
                .chain(add.split_whitespace())
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            return fail(1, "grubby: unsupported arguments");
        };
        state.kernel_args.insert(kernel, updated);
        ok()
    }

    fn set_grub_default(state: &mut NodeState, segment: &str) -> CommandResult {
        let value = segment
            .rsplit_once("GRUB_DEFAULT=\"")
            .and_then(|(_, rest)| rest.rsplit_once("\"/g"))
            .map(|(name, _)| unescape_sed(&name.replace(r"'\''", "'")));
        match value {
            Some(name) => {
                state.grub_default = Some(name);
                ok()
            }
            None => fail(1, "sed: unterminated `s' command"),
        }
    }

    fn sed_fstab(state: &mut NodeState, expr: &str) -> CommandResult {
        let expr = unquote(expr);
        let Some(uuid) = expr
            .strip_prefix("\\@^UUID=")
            .and_then(|rest| rest.strip_suffix("@d"))
        else {
            return fail(1, "sed: unknown command");
        };
        let prefix = format!("UUID={}", uuid);
        state.fstab = state
            .fstab
            .lines()
            .filter(|line| !line.starts_with(&prefix))
            .map(|line| format!("{}\n", line))
            .collect();
        ok()
    }

    fn reboot(state: &mut NodeState) -> CommandResult {
        state.last_reboot = Some(Instant::now());
        let next = state.boot_override.unwrap_or_else(|| {
            let default = state.grub_default.as_deref().unwrap_or_default().to_lowercase();
            if default.contains("nutanix") {
                OsFamily::Ahv
            } else if default.contains("phoenix") {
                OsFamily::Phoenix
            } else if default.contains("holo") {
                OsFamily::CentOs
            } else {
                state.family
            }
        });

        for marker in marker_files(state.family) {
            state.files.remove(*marker);
        }
        for marker in marker_files(next) {
            state.files.insert(marker.to_string());
        }
        state.family = next;
        if state.never_return {
            state.reachable = false;
        }
        CommandResult::transport_failure("connection closed by remote host")
    }
}

#[async_trait]
impl Transport for FakeNode {
    async fn execute(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
        options: &CallOptions,
    ) -> CommandResult {
        let mut state = self.state.lock();
        state.calls.push(command.to_string());
        state
            .budgets
            .push((command.to_string(), options.budget(endpoint)));
        if Self::down(&mut state) {
            return CommandResult::transport_failure("connection refused");
        }
        Self::run(&mut state, command)
    }

    async fn copy(
        &self,
        _endpoint: &RemoteEndpoint,
        local_paths: &[PathBuf],
        remote_target: &str,
        _options: &CallOptions,
    ) -> CommandResult {
        let mut state = self.state.lock();
        state
            .copies
            .push((local_paths.to_vec(), remote_target.to_string()));
        if Self::down(&mut state) {
            return CommandResult::transport_failure("connection refused");
        }
        if state.failing_copies > 0 {
            state.failing_copies -= 1;
            return fail(1, "scp: write failed");
        }
        state.files.insert(remote_target.to_string());
        ok()
    }
}

#[async_trait]
impl Fetcher for FakeNode {
    async fn download(&self, url: &str, dest: &Path) -> ImagingResult<u64> {
        let body = format!("payload from {}", url);
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    async fn fetch(&self, _url: &str) -> ImagingResult<Vec<u8>> {
        let descriptor = serde_json::json!({
            "host_ip": NODE_ADDRESS,
            "host_subnet_mask": "255.255.255.0",
            "default_gw": "10.1.1.1",
        });
        Ok(serde_json::to_vec(&descriptor)?)
    }
}

pub(crate) fn test_settings() -> ImagingSettings {
    ImagingSettings {
        foundation_ip: Some([10, 0, 0, 1].into()),
        ..Default::default()
    }
}

pub(crate) fn remote_for(node: &Arc<FakeNode>) -> Remote {
    Remote::new(
        RemoteEndpoint::new(NODE_ADDRESS, "root", "nutanix/4u"),
        node.clone(),
    )
}

pub(crate) fn context_with(node: &Arc<FakeNode>, settings: ImagingSettings) -> HostContext {
    let templates = CmdlineTemplates::embedded().expect("embedded templates");
    HostContext::new(node.clone(), Arc::new(settings), Arc::new(templates))
}

pub(crate) fn host_context(node: &Arc<FakeNode>) -> HostContext {
    context_with(node, test_settings())
}

pub(crate) fn linux_host(node: &Arc<FakeNode>, family: OsFamily) -> LinuxHost {
    LinuxHost::new(family, remote_for(node), host_context(node))
}

pub(crate) fn linux_host_with_staging(node: &Arc<FakeNode>, staging_dir: PathBuf) -> LinuxHost {
    let settings = ImagingSettings {
        staging_dir,
        ..test_settings()
    };
    LinuxHost::new(OsFamily::Ahv, remote_for(node), context_with(node, settings))
}
