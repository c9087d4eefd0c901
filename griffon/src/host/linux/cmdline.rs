//! Kernel command line synthesis and application.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use tera::{Context, Tera};

use super::LinuxHost;
use super::partition::PartitionCache;
use crate::config::{BootConfig, NetworkDescriptor};
use crate::errors::{ImagingError, ImagingResult};
use crate::transport::shell_quote;
use crate::types::BootTarget;

const EMBEDDED_TEMPLATES: [(&str, &str); 3] = [
    ("holo_cmdline.cfg", include_str!("../../../templates/holo_cmdline.cfg")),
    ("ahv_cmdline.cfg", include_str!("../../../templates/ahv_cmdline.cfg")),
    ("phoenix_cmdline.cfg", include_str!("../../../templates/phoenix_cmdline.cfg")),
];

const SESSION_FORMAT: &str = "%Y%m%d-%H:%M:%S";

fn template_name(target: BootTarget) -> &'static str {
    match target {
        BootTarget::Holo => "holo_cmdline.cfg",
        BootTarget::Phoenix => "phoenix_cmdline.cfg",
        BootTarget::Ahv => "ahv_cmdline.cfg",
    }
}

/// Per-target kernel command line templates.
///
/// Rendering is strict: a placeholder without a value fails the render.
pub struct CmdlineTemplates {
    tera: Tera,
}

impl CmdlineTemplates {
    /// Templates compiled into the binary.
    pub fn embedded() -> ImagingResult<Self> {
        let mut tera = Tera::default();
        for (name, content) in EMBEDDED_TEMPLATES {
            tera.add_raw_template(name, content)
                .map_err(|e| ImagingError::Template(format!("{}: {}", name, e)))?;
        }
        Ok(Self { tera })
    }

    /// Embedded templates, overridden by any `*_cmdline.cfg` found in `dir`.
    pub fn load(dir: Option<&Path>) -> ImagingResult<Self> {
        let mut templates = Self::embedded()?;
        let Some(dir) = dir else {
            return Ok(templates);
        };

        for (name, _) in EMBEDDED_TEMPLATES {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            templates
                .tera
                .add_raw_template(name, &content)
                .map_err(|e| ImagingError::Template(format!("{}: {}", path.display(), e)))?;
            tracing::debug!(template = name, path = %path.display(), "Loaded template override");
        }
        Ok(templates)
    }

    pub fn render<V: Serialize>(&self, target: BootTarget, vars: &V) -> ImagingResult<String> {
        let name = template_name(target);
        let context = Context::from_serialize(vars)
            .map_err(|e| ImagingError::Template(format!("{}: {}", name, e)))?;
        let text = self
            .tera
            .render(name, &context)
            .map_err(|e| ImagingError::Template(format!("{}: {}", name, render_error_chain(&e))))?;
        Ok(text.trim().to_string())
    }
}

/// Tera nests the useful message ("Variable `x` not found") in its sources.
fn render_error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[derive(Debug, Serialize)]
pub(super) struct HoloVars {
    pub holo_uuid: String,
}

#[derive(Debug, Serialize)]
pub(super) struct AhvVars {
    pub ahv_uuid: String,
}

#[derive(Debug, Serialize)]
pub(super) struct PhoenixVars {
    pub phx_uuid: String,
    pub foundation_ip: String,
    pub foundation_port: u16,
    pub az_conf_url: String,
    pub livefs_url: String,
    pub phoenix_ip: String,
    pub phoenix_netmask: String,
    pub phoenix_gw: String,
    pub vlan_id: String,
    pub boot_script: String,
    pub session: String,
    pub bond_mode: String,
    pub bond_uplinks: String,
    pub bond_lacp_rate: String,
    pub type_img: String,
    pub prefix: String,
    pub boot_parameters: String,
}

/// Current extra arguments of `kernel` from `grubby --info` output.
///
/// The output may list several entries. The last entry whose `kernel=` is
/// `kernel` wins; without such an entry the last `args=` line does.
pub fn parse_grubby_args(output: &str, kernel: &str) -> String {
    let mut entry_kernel = None;
    let mut matched = None;
    let mut last = None;
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim_matches(|c| c == ' ' || c == '"');
        match key.to_ascii_lowercase().as_str() {
            "index" => entry_kernel = None,
            "kernel" => entry_kernel = Some(value),
            "args" => {
                if entry_kernel == Some(kernel) {
                    matched = Some(value);
                }
                last = Some(value);
            }
            _ => {}
        }
    }
    matched.or(last).unwrap_or_default().to_string()
}

/// Wildcard bind address of the same family as `peer`.
fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Local address the kernel would use to reach `peer`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
async fn local_ip_toward(peer: &str) -> ImagingResult<IpAddr> {
    let target = tokio::net::lookup_host((peer, 80))
        .await?
        .next()
        .ok_or_else(|| ImagingError::NotFound(format!("no address resolved for {}", peer)))?;
    let socket = tokio::net::UdpSocket::bind(unspecified_for(&target)).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

impl LinuxHost {
    /// Replace the extra arguments of `kernel` with `args`.
    ///
    /// grubby appends blindly, so the current arguments are removed first.
    pub async fn set_kernel_cmdline(&self, kernel: &str, args: &str) -> ImagingResult<()> {
        let info = self
            .remote
            .run_stdout(&format!("grubby --info {}", shell_quote(kernel)))
            .await?;
        let current = parse_grubby_args(&info, kernel);
        let kernel = shell_quote(kernel);

        if !current.is_empty() {
            self.remote
                .run(&format!(
                    "grubby --remove-args={} --update-kernel {}",
                    shell_quote(&current),
                    kernel
                ))
                .await?;
        }
        self.remote
            .run(&format!(
                "grubby --args={} --update-kernel {}",
                shell_quote(args),
                kernel
            ))
            .await?;

        tracing::info!(address = %self.remote.address(), kernel = %kernel, "Updated kernel command line");
        Ok(())
    }

    /// Render the kernel command line for `target`.
    pub(super) async fn kernel_cmdline(
        &self,
        target: BootTarget,
        config: &BootConfig,
        cache: &mut PartitionCache,
    ) -> ImagingResult<String> {
        let table = &config.partition_table;
        let text = match target {
            BootTarget::Holo => {
                let holo = cache.partition(self, table.holo.id).await?;
                self.templates().render(target, &HoloVars { holo_uuid: holo.uuid })?
            }
            BootTarget::Ahv => {
                let ahv = cache.partition(self, table.nutanix.id).await?;
                self.templates().render(target, &AhvVars { ahv_uuid: ahv.uuid })?
            }
            BootTarget::Phoenix => {
                let vars = self.phoenix_vars(config, cache).await?;
                self.templates().render(target, &vars)?
            }
        };
        tracing::info!(boot_target = %target, cmdline = %text, "Generated kernel command line");
        Ok(text)
    }

    async fn phoenix_vars(
        &self,
        config: &BootConfig,
        cache: &mut PartitionCache,
    ) -> ImagingResult<PhoenixVars> {
        let ahv_id = config.partition_table.nutanix.id;
        let ahv = cache.partition(self, ahv_id).await?;

        tracing::info!(url = %config.arizona_url, "Downloading network descriptor");
        let raw = self.fetcher().fetch(&config.arizona_url).await?;
        let network = NetworkDescriptor::from_json(&raw)?;

        let settings = self.settings();
        let foundation_ip = match settings.foundation_ip {
            Some(ip) => ip,
            None => local_ip_toward(&network.host_ip).await?,
        };

        Ok(PhoenixVars {
            phx_uuid: ahv.uuid,
            foundation_ip: foundation_ip.to_string(),
            foundation_port: settings.foundation_port,
            az_conf_url: config.arizona_url.clone(),
            livefs_url: config.phoenix.livefs.url.clone(),
            phoenix_ip: network.host_ip,
            phoenix_netmask: network.host_subnet_mask,
            phoenix_gw: network.default_gw,
            vlan_id: network.svm_vlan_id,
            boot_script: config.phoenix.mode.to_lowercase(),
            session: chrono::Local::now().format(SESSION_FORMAT).to_string(),
            bond_mode: String::new(),
            bond_uplinks: String::new(),
            bond_lacp_rate: String::new(),
            type_img: "squashfs".to_string(),
            prefix: String::new(),
            boot_parameters: format!("NUTANIX_PART={}", ahv_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::testing::{FakeNode, linux_host};
    use crate::types::OsFamily;
    use std::sync::Arc;

    #[test]
    fn test_parse_grubby_args() {
        let info = "index=0\nkernel=/boot/kernel-holo\nargs=\"ro crashkernel=auto rhgb\"\nroot=UUID=1234\n";
        assert_eq!(parse_grubby_args(info, "/boot/kernel-holo"), "ro crashkernel=auto rhgb");
        assert_eq!(parse_grubby_args("index=0\nkernel=/boot/x\n", "/boot/x"), "");
    }

    #[test]
    fn test_grubby_args_follow_matching_entry() {
        let info = "index=0\nkernel=\"/boot/kernel-holo\"\nargs=\"ro quiet\"\n\
                    index=1\nkernel=\"/boot/kernel-holo\"\nargs=\"ro rhgb\"\n\
                    index=2\nkernel=\"/boot/kernel-phoenix\"\nargs=\"ip=10.1.1.10\"\n";
        assert_eq!(parse_grubby_args(info, "/boot/kernel-holo"), "ro rhgb");
        assert_eq!(parse_grubby_args(info, "/boot/kernel-phoenix"), "ip=10.1.1.10");
        assert_eq!(parse_grubby_args(info, "/boot/kernel-other"), "ip=10.1.1.10");
    }

    #[test]
    fn test_bind_address_matches_peer_family() {
        let v4: SocketAddr = "10.1.1.10:80".parse().unwrap();
        let v6: SocketAddr = "[fd00::10]:80".parse().unwrap();
        assert_eq!(unspecified_for(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(unspecified_for(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_local_ip_toward_loopback() {
        assert_eq!(
            local_ip_toward("127.0.0.1").await.unwrap(),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn test_missing_placeholder_fails_render() {
        let templates = CmdlineTemplates::embedded().unwrap();
        let err = templates
            .render(BootTarget::Holo, &AhvVars { ahv_uuid: "x".into() })
            .unwrap_err();
        assert!(matches!(err, ImagingError::Template(_)));
        assert!(err.to_string().contains("holo_uuid"));
    }

    #[test]
    fn test_directory_overrides_embedded_template() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("holo_cmdline.cfg"), "root=UUID={{ holo_uuid }} quiet\n").unwrap();

        let templates = CmdlineTemplates::load(Some(dir.path())).unwrap();
        let text = templates
            .render(BootTarget::Holo, &HoloVars { holo_uuid: "abcd".into() })
            .unwrap();
        assert_eq!(text, "root=UUID=abcd quiet");

        let text = templates
            .render(BootTarget::Ahv, &AhvVars { ahv_uuid: "ef01".into() })
            .unwrap();
        assert!(text.starts_with("root=UUID=ef01 "));
    }

    #[tokio::test]
    async fn test_kernel_args_are_replaced_not_appended() {
        let node = Arc::new(FakeNode::booted(OsFamily::CentOs));
        node.set_kernel_args("/boot/kernel-holo", "ro rhgb quiet");
        let host = linux_host(&node, OsFamily::CentOs);

        host.set_kernel_cmdline("/boot/kernel-holo", "root=UUID=abcd ro")
            .await
            .unwrap();

        assert_eq!(
            node.kernel_args("/boot/kernel-holo").as_deref(),
            Some("root=UUID=abcd ro")
        );
        let calls = node.calls();
        let remove = calls
            .iter()
            .position(|c| c.starts_with("grubby --remove-args="))
            .unwrap();
        let add = calls.iter().position(|c| c.starts_with("grubby --args=")).unwrap();
        assert!(remove < add);
    }

    #[tokio::test]
    async fn test_phoenix_cmdline_uses_descriptor_and_ahv_uuid() {
        let node = Arc::new(FakeNode::booted(OsFamily::Ahv));
        node.set_uuid("/dev/sda3", "ahv-root-uuid");
        let host = linux_host(&node, OsFamily::Ahv);
        let config = sample_config();

        let text = host
            .kernel_cmdline(BootTarget::Phoenix, &config, &mut PartitionCache::new())
            .await
            .unwrap();

        assert!(text.contains("PHX_UUID=ahv-root-uuid"));
        assert!(text.contains("init=/installer"));
        assert!(text.contains("PHOENIX_IP=10.1.1.10"));
        assert!(text.contains("FOUND_IP=10.0.0.1"));
        assert!(text.contains("FOUND_PORT=8000"));
        assert!(text.contains("NUTANIX_PART=3"));
        assert!(text.contains("VLAN= "));
    }
}
