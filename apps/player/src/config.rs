// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use mediagraph_core::{MediaSource, MetaData};
use mediagraph_engine::sim::SimMedia;
use mediagraph_engine::{EngineConfig, EnginePerfProfile};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Level;

/// Preset timing profiles for the engine.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EngineProfile {
    /// Fine-grained pulse and polling (tighter crossfades, more wakeups)
    Responsive,
    /// Defaults
    Balanced,
    /// Coarse pulse and polling for low-power hosts
    Relaxed,
}

impl From<EngineProfile> for EnginePerfProfile {
    fn from(profile: EngineProfile) -> Self {
        match profile {
            EngineProfile::Responsive => Self::Responsive,
            EngineProfile::Balanced => Self::Balanced,
            EngineProfile::Relaxed => Self::Relaxed,
        }
    }
}

/// Engine timing and sizing.
///
/// Unset values fall back to the engine defaults, adjusted by `profile`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct EngineSection {
    /// Optional preset for the pulse and buffering poll periods.
    ///
    /// Explicit values for `pulse_interval_ms` and/or `buffering_poll_ms` take precedence.
    #[serde(default)]
    pub profile: Option<EngineProfile>,
    /// Stream pulse period while playing (default: 25ms)
    pub pulse_interval_ms: Option<u64>,
    /// How long before the end "about to finish" fires (default: 2000ms)
    pub preload_time_ms: Option<i64>,
    /// Position poll period while buffering after play (default: 50ms)
    pub buffering_poll_ms: Option<u64>,
    /// Grace period before an unused output device is closed (default: 2000ms)
    pub release_grace_ms: Option<u64>,
    /// Bound on tearing down a stream (default: 10000ms)
    pub close_timeout_ms: Option<u64>,
    /// Capacity of the engine control channel (default: 128)
    pub control_capacity: Option<usize>,
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            profile: self.profile.map(Into::into),
            pulse_interval_ms: self.pulse_interval_ms.unwrap_or(defaults.pulse_interval_ms),
            preload_time_ms: self.preload_time_ms.unwrap_or(defaults.preload_time_ms),
            buffering_poll_ms: self.buffering_poll_ms.unwrap_or(defaults.buffering_poll_ms),
            release_grace_ms: self.release_grace_ms.unwrap_or(defaults.release_grace_ms),
            close_timeout_ms: self.close_timeout_ms.unwrap_or(defaults.close_timeout_ms),
            control_capacity: self.control_capacity.unwrap_or(defaults.control_capacity),
            ..defaults
        }
    }
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

/// Transport settings applied to the player's media object.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct PlaybackConfig {
    /// Gap (> 0) or crossfade (< 0) between consecutive entries, in milliseconds
    #[serde(default)]
    pub transition_time_ms: i64,
    /// Period of position ticks; 0 disables them (default: 1000ms)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Remaining time at which the prefinish mark is reported; 0 disables it
    #[serde(default)]
    pub prefinish_mark_ms: i64,
    /// Audio device index to render to
    #[serde(default)]
    pub audio_device: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            transition_time_ms: 0,
            tick_interval_ms: default_tick_interval_ms(),
            prefinish_mark_ms: 0,
            audio_device: 0,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// One entry of the software engine's media catalog.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct MediaEntry {
    /// Location the entry is played from, e.g. `sim://intro`
    pub url: String,
    /// Duration in milliseconds; 0 for an unknown length
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub video: bool,
    #[serde(default = "default_true")]
    pub seekable: bool,
    /// Delay between starting playback and the first reported position
    #[serde(default)]
    pub startup_delay_ms: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    /// Makes opening the entry fail with this reason
    #[serde(default)]
    pub fail: Option<String>,
}

impl MediaEntry {
    pub fn source(&self) -> MediaSource {
        MediaSource::url(self.url.clone())
    }

    pub fn to_sim_media(&self) -> SimMedia {
        let mut metadata = MetaData::new();
        for (key, value) in [("TITLE", &self.title), ("ARTIST", &self.artist)] {
            if let Some(value) = value {
                metadata.insert(key.to_string(), vec![value.clone()]);
            }
        }
        SimMedia {
            duration_ms: self.duration_ms,
            video: self.video,
            seekable: self.seekable,
            startup_delay_ms: self.startup_delay_ms,
            metadata,
            fail: self.fail.clone(),
            ..SimMedia::default()
        }
    }
}

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct LogConfig {
    #[serde(default)]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default)]
    pub file_path: String,
    /// Format for file logging: "text" (default) or "json"
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Debug,
            file_path: "./mgplay.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

/// Root configuration of the player.
#[derive(Deserialize, Serialize, Default, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Media catalog, played in order unless sources are named on the command line.
    #[serde(default)]
    pub media: Vec<MediaEntry>,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads the configuration from defaults, a TOML file, and `MG_` environment variables.
///
/// # Errors
///
/// Returns an error if the file exists but is not valid TOML, or if a value
/// from the file or the environment has the wrong type.
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config =
        figment.merge(Env::prefixed("MG_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to TOML.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_section_keeps_unset_defaults() {
        let section = EngineSection {
            profile: Some(EngineProfile::Relaxed),
            preload_time_ms: Some(500),
            ..EngineSection::default()
        };
        let config = section.to_engine_config().resolved();
        assert_eq!(config.preload_time_ms, 500);
        assert_eq!(config.pulse_interval_ms, 100);
        assert_eq!(config.close_timeout_ms, EngineConfig::default().close_timeout_ms);
    }

    #[test]
    fn test_media_entry_metadata() {
        let entry = MediaEntry {
            url: "sim://intro".to_string(),
            duration_ms: 4000,
            video: false,
            seekable: true,
            startup_delay_ms: 0,
            title: Some("Intro".to_string()),
            artist: None,
            fail: None,
        };
        let media = entry.to_sim_media();
        assert_eq!(media.duration_ms, 4000);
        assert_eq!(media.metadata.get("TITLE"), Some(&vec!["Intro".to_string()]));
        assert!(!media.metadata.contains_key("ARTIST"));
        assert_eq!(entry.source().to_string(), "sim://intro");
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = generate_default().unwrap_or_default();
        let parsed: Config = toml::from_str(&text).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(parsed, Config::default());
    }
}
