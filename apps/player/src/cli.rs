// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use anyhow::Context;
use clap::{Parser, Subcommand};
use schemars::schema_for;
use tracing::{info, warn};

use crate::config;
use crate::logging::LogGuard;
use crate::playback::{self, Outcome};

type LogInitFn =
    fn(&config::LogConfig) -> Result<LogGuard, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mgplay.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plays the named catalog entries, or the whole catalog
    Play {
        /// Source locations, as listed in `[[media]]`
        sources: Vec<String>,
    },
    /// Lists the output devices of the engine
    Devices,
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate a default config file and print it to stdout
    Default,
    /// Generate a JSON schema for the config and print it to stdout
    Schema,
}

fn load_config(config_path: &str) -> anyhow::Result<config::ConfigLoadResult> {
    config::load(config_path).context("failed to load configuration")
}

async fn handle_play_command(
    config_path: &str,
    sources: &[String],
    init_logging: LogInitFn,
) -> anyhow::Result<()> {
    let config_result = load_config(config_path)?;
    let _log_guard = init_logging(&config_result.config.log)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    if let Some(missing_file) = &config_result.file_missing {
        warn!(config_path = %missing_file, "Config file not found, using defaults");
    }
    let config = config_result.config;

    info!(
        entries = config.media.len(),
        transition_time_ms = config.playback.transition_time_ms,
        console_level = ?config.log.console_level,
        file_enable = config.log.file_enable,
        "Starting mgplay"
    );

    let playlist = playback::playlist(&config, sources)?;
    match playback::run(&config, &playlist).await? {
        Outcome::Finished { played } => {
            info!(played = played.len(), "Playlist finished");
            Ok(())
        },
        Outcome::Interrupted => Ok(()),
        Outcome::Failed { source, message } => {
            anyhow::bail!("playback of {source} failed: {message}")
        },
    }
}

// Allow println for CLI output to stdout (intentional)
#[allow(clippy::disallowed_macros)]
fn handle_devices_command(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?.config;
    let sim = playback::sim_backend(&config);
    let devices = mediagraph_engine::NativeBackend::audio_devices(&sim)
        .into_iter()
        .chain(mediagraph_engine::NativeBackend::video_devices(&sim));
    for device in devices {
        println!("{:?}\t{}\t{}\t{}", device.kind, device.index, device.name, device.description);
    }
    Ok(())
}

// Allow println for CLI output to stdout (intentional)
#[allow(clippy::disallowed_macros)]
fn handle_config_default_command() -> anyhow::Result<()> {
    let toml_string =
        config::generate_default().context("failed to generate default config")?;
    println!("# Default mgplay configuration file");
    println!("{toml_string}");
    Ok(())
}

// Allow println for CLI output to stdout (intentional)
#[allow(clippy::disallowed_macros)]
fn handle_config_schema_command() -> anyhow::Result<()> {
    let schema = schema_for!(config::Config);
    let json = serde_json::to_string_pretty(&schema).context("failed to generate config schema")?;
    println!("{json}");
    Ok(())
}

/// Handle CLI commands
///
/// # Errors
///
/// Returns the failure of the selected command.
pub async fn handle_command(cli: &Cli, init_logging: LogInitFn) -> anyhow::Result<()> {
    match &cli.command {
        None => handle_play_command(&cli.config, &[], init_logging).await,
        Some(Commands::Play { sources }) => {
            handle_play_command(&cli.config, sources, init_logging).await
        },
        Some(Commands::Devices) => handle_devices_command(&cli.config),
        Some(Commands::Config(ConfigCommands::Default)) => handle_config_default_command(),
        Some(Commands::Config(ConfigCommands::Schema)) => handle_config_schema_command(),
    }
}
