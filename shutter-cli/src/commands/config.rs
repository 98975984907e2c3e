//! Config command - inspect, validate and scaffold the settings file

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use shutter_core::config::{sample_config, ConfigFile};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Settings file to operate on (default: ~/.config/shutter/config.toml)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print where the settings file lives
    Path,

    /// Print the settings commands will run with
    Show {
        /// Print the file verbatim instead of the resolved settings
        #[arg(long)]
        raw: bool,
    },

    /// Report values that commands would reject or warn about
    Check,

    /// Write the annotated sample settings file
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the annotated sample settings to stdout
    Sample,
}

/// Findings for one settings file
#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Check every section the way the commands will read it
fn inspect(file: &ConfigFile) -> Findings {
    let mut findings = Findings::default();

    if let Err(e) = file.recording_config() {
        findings.errors.push(format!("[recording] {}", e));
    }
    match file.timelapse_config() {
        Ok(timelapse) => findings.warnings.extend(
            timelapse
                .validate()
                .into_iter()
                .map(|w| format!("[timelapse] {}", w)),
        ),
        Err(e) => findings.errors.push(format!("[timelapse] {}", e)),
    }

    findings
}

/// Write the sample to `path`. Returns false when a file exists and `force` is off.
fn write_sample(path: &Path, force: bool) -> Result<bool> {
    if force && path.exists() {
        std::fs::write(path, sample_config())
            .with_context(|| format!("Cannot write {}", path.display()))?;
        return Ok(true);
    }
    Ok(ConfigFile::create_default_if_missing(path)?)
}

fn print_resolved(file: &ConfigFile) {
    match file.recording_config() {
        Ok(rec) => {
            let q = rec.quality;
            println!("[recording]");
            println!(
                "  Preset:     {} ({}x{} @ {} fps, {} Mbps)",
                q,
                q.width(),
                q.height(),
                q.fps(),
                q.bitrate_bps() / 1_000_000
            );
            println!("  Audio:      {}", if rec.audio_enabled { "on" } else { "off" });
            println!("  Encoder:    {}", rec.encoder.as_deref().unwrap_or("auto"));
            println!("  Saves to:   {}/{}_*.mp4", rec.output_dir.display(), rec.prefix);
        }
        Err(_) => println!("[recording]\n  (invalid, see below)"),
    }
    println!();

    match file.timelapse_config() {
        Ok(tl) => {
            println!("[timelapse]");
            println!(
                "  Video:      {}x{} @ {} fps, {} kbps",
                tl.width,
                tl.height,
                tl.output_fps,
                tl.bitrate_bps / 1000
            );
            println!("  Interval:   {} ms", tl.capture_interval.as_millis());
            println!("  Bad stills: {}", file.timelapse.on_decode_failure);
            match tl.stall_timeout {
                Some(limit) => println!("  Stall:      fail after {} ms", limit.as_millis()),
                None => println!("  Stall:      wait indefinitely"),
            }
            println!(
                "  Saves to:   {}/{}_*.mp4",
                file.output.directory().display(),
                file.output.timelapse_prefix
            );
        }
        Err(_) => println!("[timelapse]\n  (invalid, see below)"),
    }
}

fn print_findings(findings: &Findings) {
    for e in &findings.errors {
        println!("  error:   {}", e);
    }
    for w in &findings.warnings {
        println!("  warning: {}", w);
    }
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    let path = args.file.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            let state = if path.exists() { "present" } else { "missing" };
            println!("{} ({})", path.display(), state);
        }
        ConfigCommand::Show { raw: true } => {
            if !path.exists() {
                bail!("{} does not exist; try `shutter config init`", path.display());
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            print!("{}", content);
        }
        ConfigCommand::Show { raw: false } => {
            let file = ConfigFile::load_from(path.clone())?;
            if path.exists() {
                println!("Settings from {}\n", path.display());
            } else {
                println!("Built-in defaults ({} not found)\n", path.display());
            }
            print_resolved(&file);

            let findings = inspect(&file);
            if !findings.errors.is_empty() || !findings.warnings.is_empty() {
                println!();
                print_findings(&findings);
            }
        }
        ConfigCommand::Check => {
            let file = ConfigFile::load_from(path.clone())?;
            let findings = inspect(&file);
            print_findings(&findings);
            if !findings.errors.is_empty() {
                bail!("{} has {} invalid value(s)", path.display(), findings.errors.len());
            }
            println!("{}: OK", path.display());
        }
        ConfigCommand::Init { force } => {
            if write_sample(&path, force)? {
                println!("Wrote {}", path.display());
            } else {
                println!("{} already exists; pass --force to replace it", path.display());
            }
        }
        ConfigCommand::Sample => print!("{}", sample_config()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_have_no_findings() {
        let findings = inspect(&ConfigFile::default());
        assert!(findings.errors.is_empty());
        assert!(findings.warnings.is_empty());
    }

    #[test]
    fn test_bad_values_reported_per_section() {
        let mut file = ConfigFile::default();
        file.recording.quality = "8K_120".to_string();
        file.timelapse.on_decode_failure = "retry".to_string();

        let findings = inspect(&file);
        assert_eq!(findings.errors.len(), 2);
        assert!(findings.errors[0].starts_with("[recording]"));
        assert!(findings.errors[1].starts_with("[timelapse]"));
    }

    #[test]
    fn test_high_fps_is_a_warning_only() {
        let mut file = ConfigFile::default();
        file.timelapse.output_fps = 120;

        let findings = inspect(&file);
        assert!(findings.errors.is_empty());
        assert!(findings.warnings.iter().any(|w| w.contains("unusually high")));
    }

    #[test]
    fn test_write_sample_respects_force() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        assert!(write_sample(&path, false).unwrap());
        std::fs::write(&path, "# edited\n").unwrap();

        assert!(!write_sample(&path, false).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");

        assert!(write_sample(&path, true).unwrap());
        let written = ConfigFile::load_from(path).unwrap();
        assert!(inspect(&written).errors.is_empty());
    }
}
