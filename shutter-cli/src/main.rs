//! Shutter CLI
//!
//! Camera recording and timelapse synthesis from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Turn a folder of JPEG stills into a 30fps timelapse
//! shutter encode ~/Pictures/garden
//!
//! # Capture a still every 5 seconds with an external command
//! shutter timelapse --capture-cmd "fswebcam -q -" --interval-ms 5000
//!
//! # Record 10 seconds of the test pattern at 720p
//! shutter record --quality HD_30 --duration 10
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the `-v` level.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Camera recording and timelapse synthesis
#[derive(Parser)]
#[command(name = "shutter", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a directory of stills into a timelapse video
    Encode(commands::EncodeArgs),

    /// Capture stills periodically, then encode them into a timelapse
    Timelapse(commands::TimelapseArgs),

    /// Record live video of a test pattern
    Record(commands::RecordArgs),

    /// List recording quality presets
    Presets(commands::PresetsArgs),

    /// Show H.264 encoder availability
    Info,

    /// Inspect or create the settings file
    Config(commands::ConfigArgs),
}

impl Commands {
    async fn run(self) -> Result<()> {
        match self {
            Self::Encode(args) => commands::encode(args).await,
            Self::Timelapse(args) => commands::timelapse(args).await,
            Self::Record(args) => commands::record(args).await,
            Self::Presets(args) => commands::presets(args),
            Self::Info => commands::info().await,
            Self::Config(args) => commands::config(args).await,
        }
    }
}

/// Filter directives for a `-v` count
fn log_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("shutter_core={level},shutter={level}")
}

fn init_logging(verbose: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_filter(verbose))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    cli.command.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(log_filter(0), "shutter_core=warn,shutter=warn");
        assert_eq!(log_filter(2), "shutter_core=debug,shutter=debug");
        assert_eq!(log_filter(9), "shutter_core=trace,shutter=trace");
        assert!(EnvFilter::try_new(log_filter(1)).is_ok());
    }

    #[test]
    fn test_verbose_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["shutter", "presets", "-vv", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Presets(_)));
    }

    #[test]
    fn test_config_file_flag_is_global() {
        let cli = Cli::try_parse_from(["shutter", "config", "check", "--file", "x.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(_)));
    }
}
