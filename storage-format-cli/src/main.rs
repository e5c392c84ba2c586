// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use storage_format::config::Layered;
use storage_format::{
    Dispatcher, DryRunRunner, EnvProperties, FstabEntry, ProcessRunner, PropertyLookup, Settings,
    ToolRunner, probe_size, read_signature,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/fs-format.toml";

/// Privileged helper that formats or grows fstab-managed partitions
#[derive(Parser)]
#[command(name = "fs-format")]
#[command(about = "Format or resize partitions with the platform filesystem tools", long_about = None)]
struct Cli {
    /// Settings file with tool locations, properties and partitions
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log tool invocations instead of running them
    #[arg(long, global = true)]
    dry_run: bool,
    /// Let EXTERNAL_STORAGE_* environment variables override configured properties
    #[arg(long, global = true)]
    env_properties: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new filesystem on a configured partition
    Format {
        /// Mount point identifying the partition
        mount_point: String,
        /// Keep the crypto footer at the end of the device free
        #[arg(long)]
        crypt_footer: bool,
    },
    /// Grow the F2FS filesystem of a configured partition
    Resize {
        /// Mount point identifying the partition
        mount_point: String,
        /// Keep the crypto footer at the end of the device free
        #[arg(long)]
        crypt_footer: bool,
    },
    /// Print the tool invocations an operation would run, as JSON
    Plan {
        operation: Operation,
        /// Mount point identifying the partition
        mount_point: String,
        /// Keep the crypto footer at the end of the device free
        #[arg(long)]
        crypt_footer: bool,
    },
    /// Report device size and F2FS superblock, as JSON
    Probe {
        /// Block device or image file
        device: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Operation {
    Format,
    Resize,
}

#[derive(Debug, Serialize)]
struct ProbeOutput {
    device: PathBuf,
    size_bytes: Option<u64>,
    superblock: Option<SuperblockOutput>,
}

#[derive(Debug, Serialize)]
struct SuperblockOutput {
    major_version: u16,
    minor_version: u16,
    block_count: u64,
    byte_size: u64,
}

fn main() -> Result<ExitCode> {
    // Logs go to stderr so stdout stays clean for JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_format=info,fs_format=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    let status = match &cli.command {
        Commands::Probe { device } => probe(device)?,
        command => dispatch(&cli, command)?,
    };

    Ok(to_exit_code(status))
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => {
            Settings::load(path).with_context(|| format!("Failed to load settings from {:?}", path))
        }
        None if Path::new(DEFAULT_CONFIG).exists() => Settings::load(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load settings from {}", DEFAULT_CONFIG)),
        None => Ok(Settings::default()),
    }
}

fn find_entry<'a>(settings: &'a Settings, mount_point: &str) -> Result<&'a FstabEntry> {
    settings
        .partition(mount_point)
        .with_context(|| format!("No partition configured for {}", mount_point))
}

fn dispatch(cli: &Cli, command: &Commands) -> Result<i32> {
    let settings = load_settings(cli.config.as_deref())?;

    let env = EnvProperties;
    let layered = Layered {
        upper: &env,
        lower: &settings.properties,
    };
    let properties: &dyn PropertyLookup = if cli.env_properties {
        &layered
    } else {
        &settings.properties
    };
    let runner: &dyn ToolRunner = if cli.dry_run {
        &DryRunRunner
    } else {
        &ProcessRunner
    };

    let dispatcher = Dispatcher::new(runner, properties)
        .with_tools(settings.tool_paths())
        .with_crypt_footer_bytes(settings.crypt_footer_bytes);

    let status = match command {
        Commands::Format {
            mount_point,
            crypt_footer,
        } => dispatcher.format_entry(find_entry(&settings, mount_point)?, *crypt_footer),
        Commands::Resize {
            mount_point,
            crypt_footer,
        } => dispatcher.resize_entry(find_entry(&settings, mount_point)?, *crypt_footer),
        Commands::Plan {
            operation,
            mount_point,
            crypt_footer,
        } => {
            let spec = find_entry(&settings, mount_point)?.to_spec()?;
            let plan = match operation {
                Operation::Format => dispatcher.plan_format(&spec, *crypt_footer)?,
                Operation::Resize => dispatcher.plan_resize(&spec, *crypt_footer)?,
            };
            println!("{}", serde_json::to_string_pretty(&plan)?);
            0
        }
        Commands::Probe { device } => probe(device)?,
    };

    Ok(status)
}

fn probe(device: &Path) -> Result<i32> {
    let size_bytes = match probe_size(device) {
        Ok(size) => Some(size),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let superblock = read_signature(device).map(|header| SuperblockOutput {
        major_version: header.major_version,
        minor_version: header.minor_version,
        block_count: header.block_count,
        byte_size: header.byte_size(),
    });

    let output = ProbeOutput {
        device: device.to_path_buf(),
        size_bytes,
        superblock,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(0)
}

/// Negative fs_mgr statuses have no shell equivalent.
fn shell_status(status: i32) -> Option<u8> {
    u8::try_from(status).ok()
}

fn to_exit_code(status: i32) -> ExitCode {
    match shell_status(status) {
        Some(code) => ExitCode::from(code),
        None => {
            error!("Operation failed with status {}", status);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_plan_with_global_flags() {
        let cli = Cli::try_parse_from([
            "fs-format",
            "--dry-run",
            "plan",
            "resize",
            "/data",
            "--crypt-footer",
        ])
        .unwrap();

        assert!(cli.dry_run);
        assert!(matches!(
            cli.command,
            Commands::Plan {
                operation: Operation::Resize,
                crypt_footer: true,
                ..
            }
        ));
    }

    #[test]
    fn shell_statuses() {
        assert_eq!(shell_status(0), Some(0));
        assert_eq!(shell_status(8), Some(8));
        assert_eq!(shell_status(-22), None);
        assert_eq!(shell_status(300), None);
    }

    #[test]
    fn example_settings_load() {
        let raw = include_str!("../../resources/fs-format.example.toml");
        let settings = Settings::from_toml(raw).unwrap();

        assert_eq!(settings.crypt_footer_bytes, 16384);
        let data = find_entry(&settings, "/data").unwrap().to_spec().unwrap();
        assert!(data.is_data_partition());
        assert!(find_entry(&settings, "/cache").unwrap().to_spec().is_ok());
    }

    #[test]
    fn missing_partition_is_reported() {
        let settings = Settings::default();
        let err = find_entry(&settings, "/data").unwrap_err();
        assert!(err.to_string().contains("/data"));
    }
}
