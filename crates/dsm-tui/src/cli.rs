use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;

use dsm_core::models::{InternalPortSource, RemoveOutcome, RunOutcome, StopOutcome, UnitStatus};
use dsm_core::services::service_manager::{InstallRequest, ServiceManager};

#[derive(Parser)]
#[command(name = "dsm")]
#[command(about = "Docker Service Manager - udocker services supervised in tmux")]
pub struct Cli {
    /// State directory (defaults to $DSM_HOME, then ~/.dsm)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Write debug logs to dsm-debug.log in the state directory
    #[arg(long, global = true)]
    pub debug: bool,

    /// Drive the TUI from a script and print rendered frames
    #[arg(long, value_name = "SCRIPT")]
    pub headless: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List installed services with live status
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull an image and register it as a service
    Install {
        /// Image reference, e.g. nginx or library/redis:7
        image: String,
        /// Service name (derived from the image by default)
        #[arg(long)]
        name: Option<String>,
        /// Port the service listens on inside the container
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        internal_port: Option<u16>,
        /// Host port to publish (next free port by default)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
        /// tmux window name (service name by default)
        #[arg(long)]
        window: Option<String>,
        /// Replace an existing service of the same name
        #[arg(long)]
        force: bool,
    },
    /// Start a service in its tmux window
    Run { name: String },
    /// Stop a service's tmux window
    Stop { name: String },
    /// Remove a service with its container, image and data
    Remove { name: String },
    /// Report drift between the registry and the system
    Check,
}

/// Run one non-interactive command, writing human output to `out`.
pub async fn execute(
    manager: &ServiceManager,
    command: Command,
    out: &mut impl Write,
) -> color_eyre::Result<()> {
    match command {
        Command::List { json } => {
            let services = manager.list().await;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&services)?)?;
                return Ok(());
            }
            if services.is_empty() {
                writeln!(out, "No services installed.")?;
                return Ok(());
            }
            writeln!(out, "{:<20} {:<8} {:<12} IMAGE", "NAME", "STATUS", "PORTS")?;
            for service in &services {
                let record = &service.record;
                let status = match service.status {
                    UnitStatus::Running => "running",
                    UnitStatus::Absent => "stopped",
                };
                writeln!(
                    out,
                    "{:<20} {:<8} {:<12} {}",
                    record.name,
                    status,
                    record.port_mapping(),
                    record.image
                )?;
            }
        }
        Command::Install {
            image,
            name,
            internal_port,
            port,
            window,
            force,
        } => {
            let request = InstallRequest {
                image,
                name,
                internal_port,
                external_port: port,
                window_name: window,
                overwrite: force,
            };
            let outcome = manager.install(request).await?;
            let record = &outcome.record;
            if outcome.internal_port_source == InternalPortSource::Defaulted {
                writeln!(
                    out,
                    "warning: image declares no port, assuming internal port {}",
                    record.internal_port
                )?;
            }
            writeln!(
                out,
                "Installed {} ({}) on {}",
                record.name,
                record.image,
                record.access_address()
            )?;
        }
        Command::Run { name } => match manager.run(&name).await? {
            RunOutcome::Started { access } => writeln!(out, "Started {name} on {access}")?,
            RunOutcome::AlreadyRunning => writeln!(out, "{name} is already running")?,
        },
        Command::Stop { name } => match manager.stop(&name).await? {
            StopOutcome::Stopped => writeln!(out, "Stopped {name}")?,
            StopOutcome::NotRunning => writeln!(out, "{name} is not running")?,
        },
        Command::Remove { name } => match manager.remove(&name).await? {
            RemoveOutcome::Removed => writeln!(out, "Removed {name}")?,
            RemoveOutcome::NotInstalled => writeln!(out, "{name} is not installed")?,
        },
        Command::Check => {
            let drift = manager.check().await?;
            if drift.is_empty() {
                writeln!(out, "No drift found.")?;
                return Ok(());
            }
            for item in &drift {
                writeln!(out, "{item}")?;
            }
            return Err(eyre!("{} issue(s) found", drift.len()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_install_flags() {
        let cli = Cli::try_parse_from([
            "dsm",
            "install",
            "redis:7",
            "--internal-port",
            "6379",
            "--port",
            "7000",
            "--force",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Install {
                image: "redis:7".into(),
                name: None,
                internal_port: Some(6379),
                port: Some(7000),
                window: None,
                force: true,
            })
        );
    }

    #[test]
    fn rejects_port_zero() {
        assert!(Cli::try_parse_from(["dsm", "install", "nginx", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["dsm", "install", "nginx", "--port", "70000"]).is_err());
    }

    #[test]
    fn no_subcommand_means_interactive() {
        let cli = Cli::try_parse_from(["dsm", "--root", "/tmp/dsm"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/dsm")));
    }
}
