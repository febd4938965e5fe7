// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Configuration for the engine actor and its streams.

use crate::constants::{
    DEFAULT_BUFFERING_POLL_MS, DEFAULT_CLOSE_TIMEOUT_MS, DEFAULT_ENGINE_CONTROL_CAPACITY,
    DEFAULT_KEEP_REFERENCE_MS, DEFAULT_PRELOAD_TIME_MS, DEFAULT_PULSE_INTERVAL_MS,
    DEFAULT_REAPER_INTERVAL_MS, DEFAULT_RELEASE_GRACE_MS, DEFAULT_STREAM_INFO_WAIT_MS,
    DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const fn default_control_capacity() -> usize {
    DEFAULT_ENGINE_CONTROL_CAPACITY
}

const fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY
}

const fn default_pulse_interval_ms() -> u64 {
    DEFAULT_PULSE_INTERVAL_MS
}

const fn default_preload_time_ms() -> i64 {
    DEFAULT_PRELOAD_TIME_MS
}

const fn default_buffering_poll_ms() -> u64 {
    DEFAULT_BUFFERING_POLL_MS
}

const fn default_stream_info_wait_ms() -> u64 {
    DEFAULT_STREAM_INFO_WAIT_MS
}

const fn default_release_grace_ms() -> u64 {
    DEFAULT_RELEASE_GRACE_MS
}

const fn default_reaper_interval_ms() -> u64 {
    DEFAULT_REAPER_INTERVAL_MS
}

const fn default_keep_reference_ms() -> u64 {
    DEFAULT_KEEP_REFERENCE_MS
}

const fn default_close_timeout_ms() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_MS
}

/// Preset timing profiles for the engine.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePerfProfile {
    /// Fine-grained pulse and polling (more wakeups, tighter crossfades)
    Responsive,
    /// Defaults
    Balanced,
    /// Coarse pulse and polling for low-power hosts
    Relaxed,
}

/// Configuration for the engine actor.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Optional preset, applied by [`EngineConfig::resolved`] to timing fields
    /// still at their defaults.
    #[serde(default)]
    pub profile: Option<EnginePerfProfile>,
    /// Capacity of the façade → engine control channel (default: 128)
    #[serde(default = "default_control_capacity")]
    pub control_capacity: usize,
    /// Capacity of each event subscriber channel (default: 256)
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    /// Stream pulse period while playing (default: 25ms)
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
    /// About-to-finish lead time (default: 2000ms)
    #[serde(default = "default_preload_time_ms")]
    pub preload_time_ms: i64,
    /// Position poll period while buffering after play (default: 50ms)
    #[serde(default = "default_buffering_poll_ms")]
    pub buffering_poll_ms: u64,
    /// Bounded wait for has-video / seekable queries (default: 80ms)
    #[serde(default = "default_stream_info_wait_ms")]
    pub stream_info_wait_ms: u64,
    /// Terminus deferred-release grace period (default: 2000ms)
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
    /// Terminus reaper period (default: 250ms)
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
    /// Keep-alive of nodes referenced by a rewire batch (default: 10000ms)
    #[serde(default = "default_keep_reference_ms")]
    pub keep_reference_ms: u64,
    /// Bound on synchronous stream teardown (default: 10000ms)
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: None,
            control_capacity: DEFAULT_ENGINE_CONTROL_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY,
            pulse_interval_ms: DEFAULT_PULSE_INTERVAL_MS,
            preload_time_ms: DEFAULT_PRELOAD_TIME_MS,
            buffering_poll_ms: DEFAULT_BUFFERING_POLL_MS,
            stream_info_wait_ms: DEFAULT_STREAM_INFO_WAIT_MS,
            release_grace_ms: DEFAULT_RELEASE_GRACE_MS,
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL_MS,
            keep_reference_ms: DEFAULT_KEEP_REFERENCE_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Applies the preset profile over fields that still hold their defaults.
    #[must_use]
    pub fn resolved(mut self) -> Self {
        let Some(profile) = self.profile else {
            return self;
        };
        let (pulse, poll) = match profile {
            EnginePerfProfile::Responsive => (10, 20),
            EnginePerfProfile::Balanced => (DEFAULT_PULSE_INTERVAL_MS, DEFAULT_BUFFERING_POLL_MS),
            EnginePerfProfile::Relaxed => (100, 200),
        };
        if self.pulse_interval_ms == DEFAULT_PULSE_INTERVAL_MS {
            self.pulse_interval_ms = pulse;
        }
        if self.buffering_poll_ms == DEFAULT_BUFFERING_POLL_MS {
            self.buffering_poll_ms = poll;
        }
        self
    }

    pub const fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    pub const fn buffering_poll(&self) -> Duration {
        Duration::from_millis(self.buffering_poll_ms)
    }

    pub const fn stream_info_wait(&self) -> Duration {
        Duration::from_millis(self.stream_info_wait_ms)
    }

    pub const fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub const fn keep_reference(&self) -> Duration {
        Duration::from_millis(self.keep_reference_ms)
    }

    pub const fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_only_overrides_defaults() {
        let config = EngineConfig {
            profile: Some(EnginePerfProfile::Relaxed),
            buffering_poll_ms: 75,
            ..EngineConfig::default()
        }
        .resolved();

        assert_eq!(config.pulse_interval_ms, 100);
        assert_eq!(config.buffering_poll_ms, 75);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"profile":"responsive","close_timeout_ms":500}"#)
                .unwrap_or_default();
        assert_eq!(config.profile, Some(EnginePerfProfile::Responsive));
        assert_eq!(config.close_timeout(), Duration::from_millis(500));
        assert_eq!(config.preload_time_ms, DEFAULT_PRELOAD_TIME_MS);
    }
}
