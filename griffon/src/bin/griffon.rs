//! Command-line driver for the imaging workflows.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use griffon::config::ConfigSource;
use griffon::host::{SanitizeOptions, WipeMode};
use griffon::logging::init_logging;
use griffon::settings::ImagingSettings;
use griffon::types::{BootTarget, DEFAULT_USER, RemoteEndpoint};
use griffon::workflow::{WorkflowReport, Workflows};

#[derive(Parser)]
#[command(name = "griffon", about = "Re-image nodes between holo, phoenix and ahv", version)]
struct Cli {
    /// Address of the node to operate on.
    #[arg(long, env = "GRIFFON_NODE")]
    node: String,

    #[arg(long, env = "GRIFFON_USER", default_value = DEFAULT_USER)]
    user: String,

    #[arg(long, env = "GRIFFON_PASSWORD", hide_env_values = true)]
    password: String,

    /// JSON file overriding imaging settings.
    #[arg(long, env = "GRIFFON_SETTINGS")]
    settings: Option<PathBuf>,

    /// Also write logs to a daily-rolling file in this directory.
    #[arg(long, env = "GRIFFON_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConfigArg {
    /// Boot configuration JSON.
    #[arg(long, short = 'c')]
    config: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Fast,
    Secure,
}

impl From<Mode> for WipeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Fast => WipeMode::Fast,
            Mode::Secure => WipeMode::Secure,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the OS family the node is running.
    Detect,
    /// Reboot the node into holo, phoenix or ahv.
    Reboot {
        target: BootTarget,
        #[command(flatten)]
        config: ConfigArg,
        /// Wait with the first-boot budget instead of the routine one.
        #[arg(long)]
        first_boot: bool,
    },
    /// Stage the installer payload on the node.
    Stage {
        #[command(flatten)]
        config: ConfigArg,
    },
    /// Move an AHV node to holo and wipe its disks.
    Sanitize {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long, value_enum, default_value = "fast")]
        mode: Mode,
        #[arg(long, env = "GRIFFON_SANITIZE_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
        #[arg(long)]
        consent: String,
        /// Local path of the wipe script.
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<ImagingSettings> {
    let Some(path) = path else {
        return Ok(ImagingSettings::default());
    };
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("invalid settings in {}", path.display()))
}

async fn run(cli: Cli) -> anyhow::Result<WorkflowReport> {
    let settings = load_settings(cli.settings.as_ref())?;
    let endpoint = RemoteEndpoint::new(cli.node, cli.user, cli.password);
    let workflows = Workflows::from_settings(settings).context("failed to set up workflows")?;

    let report = match cli.command {
        Command::Detect => workflows.detect(endpoint).await,
        Command::Reboot {
            target,
            config,
            first_boot,
        } => {
            let source = ConfigSource::from(config.config);
            workflows.reboot_to(endpoint, target, &source, first_boot).await
        }
        Command::Stage { config } => {
            workflows
                .stage_payload(endpoint, &ConfigSource::from(config.config))
                .await
        }
        Command::Sanitize {
            config,
            mode,
            passphrase,
            consent,
            script,
        } => {
            let mut options = SanitizeOptions::new(passphrase, consent).with_mode(mode.into());
            if let Some(script) = script {
                options.script_path = script;
            }
            workflows
                .sanitize(endpoint, &ConfigSource::from(config.config), &options)
                .await
        }
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_filter.as_deref(), cli.log_dir.as_deref())?;

    let report = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
